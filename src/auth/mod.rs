// Basic-auth gate for the internal pages (file downloads, gated endpoints).
// Modules only talk inside a protected local network, so this is a plain
// string comparison against two values from the secrets file.
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;

pub const USER_KEY: &str = "USER";
pub const PASSWORD_KEY: &str = "PASSWORD";
const CHALLENGE: &str = "Basic realm=\"Login Required\"";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credentials supplied")]
    Missing,
    #[error("malformed authorization header")]
    Malformed,
    #[error("secrets not configured")]
    NotConfigured,
    #[error("credentials rejected")]
    Rejected,
}

/// Whether an endpoint sits behind the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Open,
    Gated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Parses an `Authorization` header value of the form `Basic <base64(user:password)>`.
    pub fn from_header(value: &str) -> Result<Self, AuthError> {
        let (scheme, encoded) = value.trim().split_once(' ').ok_or(AuthError::Malformed)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::Malformed);
        }
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (username, password) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_request(req: &HttpRequest) -> Result<Self, AuthError> {
        let value = req
            .headers()
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;
        Self::from_header(value)
    }

    pub fn to_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

/// Key/value secrets read from a dotenv-style file.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    /// Reads `path`; a missing or unreadable file gives empty secrets, which
    /// makes every gated request fail.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let secrets = Self::parse(&contents);
                if secrets.user().is_none() || secrets.password().is_none() {
                    tracing::warn!(
                        path = %path.display(),
                        "USER or PASSWORD missing from secrets, gated endpoints will deny every request"
                    );
                }
                secrets
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "could not read secrets, gated endpoints will deny every request"
                );
                Secrets::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Self {
        let values = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let line = line.strip_prefix("export ").unwrap_or(line);
                let (key, value) = line.split_once('=')?;
                Some((key.trim().to_string(), unquote(value.trim()).to_string()))
            })
            .collect();
        Secrets { values }
    }

    pub fn from_credentials(username: &str, password: &str) -> Self {
        let values = [
            (USER_KEY.to_string(), username.to_string()),
            (PASSWORD_KEY.to_string(), password.to_string()),
        ]
        .into_iter()
        .collect();
        Secrets { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn user(&self) -> Option<&str> {
        self.get(USER_KEY)
    }

    pub fn password(&self) -> Option<&str> {
        self.get(PASSWORD_KEY)
    }

    pub fn verify(&self, creds: &Credentials) -> Result<(), AuthError> {
        let (user, password) = match (self.user(), self.password()) {
            (Some(u), Some(p)) => (u, p),
            _ => return Err(AuthError::NotConfigured),
        };
        if creds.username == user && creds.password == password {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }

    pub fn authorize(&self, req: &HttpRequest) -> Result<(), AuthError> {
        let creds = Credentials::from_request(req)?;
        self.verify(&creds)
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

pub fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, CHALLENGE))
        .body("Unauthorized")
}

/// Runs `handler` only when the request carries the right credentials.
pub async fn gate<F, Fut>(secrets: &Secrets, req: &HttpRequest, handler: F) -> HttpResponse
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = HttpResponse>,
{
    if let Err(e) = secrets.authorize(req) {
        tracing::info!(path = %req.path(), reason = %e, "denied gated request");
        return unauthorized();
    }
    handler().await
}

/// Applies the gate only for [`Access::Gated`].
pub async fn guard<F, Fut>(
    access: Access,
    secrets: &Secrets,
    req: &HttpRequest,
    handler: F,
) -> HttpResponse
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = HttpResponse>,
{
    match access {
        Access::Open => handler().await,
        Access::Gated => gate(secrets, req, handler).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn parses_basic_header() {
        let creds = Credentials::from_header("Basic YWRtaW46czNjcmV0").unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn password_may_contain_colons() {
        let header = Credentials {
            username: "admin".into(),
            password: "a:b:c".into(),
        }
        .to_header();
        let creds = Credentials::from_header(&header).unwrap();
        assert_eq!(creds.password, "a:b:c");
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(
            Credentials::from_header("Bearer abc"),
            Err(AuthError::Malformed)
        );
        assert_eq!(
            Credentials::from_header("Basic !!!"),
            Err(AuthError::Malformed)
        );
        // "nocolon"
        assert_eq!(
            Credentials::from_header("Basic bm9jb2xvbg=="),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn dotenv_parsing() {
        let secrets = Secrets::parse(
            "# module secrets\nUSER=admin\nexport PASSWORD=\"pa ss\"\n\nOTHER = 'x'\nbroken line\n",
        );
        assert_eq!(secrets.user(), Some("admin"));
        assert_eq!(secrets.password(), Some("pa ss"));
        assert_eq!(secrets.get("OTHER"), Some("x"));
        assert_eq!(secrets.get("broken line"), None);
    }

    #[test]
    fn missing_secrets_file_denies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Secrets::load(dir.path().join(".env"));
        let creds = Credentials {
            username: String::new(),
            password: String::new(),
        };
        assert_eq!(secrets.verify(&creds), Err(AuthError::NotConfigured));
    }

    #[test]
    fn authorize_checks_both_values() {
        let secrets = Secrets::from_credentials("admin", "s3cret");
        let good = Credentials {
            username: "admin".into(),
            password: "s3cret".into(),
        };
        let wrong_user = Credentials {
            username: "root".into(),
            password: "s3cret".into(),
        };

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, good.to_header()))
            .to_http_request();
        assert_eq!(secrets.authorize(&req), Ok(()));

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, wrong_user.to_header()))
            .to_http_request();
        assert_eq!(secrets.authorize(&req), Err(AuthError::Rejected));

        let req = TestRequest::default().to_http_request();
        assert_eq!(secrets.authorize(&req), Err(AuthError::Missing));
    }

    #[actix_web::test]
    async fn gate_skips_handler_on_deny() {
        let secrets = Secrets::from_credentials("admin", "s3cret");
        let req = TestRequest::default().to_http_request();
        let mut called = false;
        let resp = gate(&secrets, &req, || {
            called = true;
            async { HttpResponse::Ok().finish() }
        })
        .await;
        assert_eq!(resp.status(), 401);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Login Required\""
        );
        assert!(!called);
    }

    #[actix_web::test]
    async fn open_access_skips_the_check() {
        let secrets = Secrets::default();
        let req = TestRequest::default().to_http_request();
        let resp = guard(Access::Open, &secrets, &req, || async {
            HttpResponse::Ok().finish()
        })
        .await;
        assert_eq!(resp.status(), 200);
    }
}
