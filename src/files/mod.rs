use std::path::{Component, Path, PathBuf};

use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use once_cell::sync::Lazy;
use rust_embed::Embed;
use thiserror::Error;
use tokio::fs;

pub const DOWNLOAD_PAGE: &str = "download_page.html";
const FILES_MARKER: &str = "{{ files }}";
const DOWNLOAD_ROUTE: &str = "/downloadfiles/";

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("path escapes the storage directory: {0}")]
    Forbidden(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ResponseError for FileError {
    fn status_code(&self) -> StatusCode {
        match self {
            FileError::NotFound(_) => StatusCode::NOT_FOUND,
            FileError::Forbidden(_) => StatusCode::FORBIDDEN,
            FileError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            // keep server paths out of the response
            FileError::Io { .. } => "storage unavailable".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "message": message
        }))
    }
}

#[derive(Embed)]
#[folder = "templates/"]
struct DefaultTemplates;

static DEFAULT_DOWNLOAD_PAGE: Lazy<String> = Lazy::new(|| {
    DefaultTemplates::get(DOWNLOAD_PAGE)
        .map(|file| String::from_utf8_lossy(&file.data).into_owned())
        .unwrap_or_else(|| format!("<html><body><ul>{FILES_MARKER}</ul></body></html>"))
});

/// Storage directory plus the template directory the listing page lives in.
#[derive(Debug, Clone)]
pub struct FileStore {
    storage_dir: PathBuf,
    template_dir: PathBuf,
}

impl FileStore {
    pub fn new(storage_dir: impl Into<PathBuf>, template_dir: impl Into<PathBuf>) -> Self {
        FileStore {
            storage_dir: storage_dir.into(),
            template_dir: template_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    /// Entry names of the storage directory, not recursive, sorted.
    pub async fn list(&self) -> Result<Vec<String>, FileError> {
        let io_err = |source| FileError::Io {
            path: self.storage_dir.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.storage_dir).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Resolves `filename` inside the storage directory. Anything that would
    /// land outside of it, symlinks included, is `Forbidden`.
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf, FileError> {
        let relative = Path::new(filename);
        let mut has_normal = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_normal = true,
                Component::CurDir => {}
                _ => return Err(FileError::Forbidden(filename.to_string())),
            }
        }
        if !has_normal {
            return Err(FileError::NotFound(filename.to_string()));
        }

        let root = fs::canonicalize(&self.storage_dir)
            .await
            .map_err(|source| FileError::Io {
                path: self.storage_dir.clone(),
                source,
            })?;
        // Past the storage root, every failure comes from the client's name
        // (missing, a file used as a directory, NUL bytes, too long).
        let resolved = match fs::canonicalize(root.join(relative)).await {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(file = %filename, error = %e, "cannot resolve download");
                return Err(FileError::NotFound(filename.to_string()));
            }
        };
        if !resolved.starts_with(&root) {
            return Err(FileError::Forbidden(filename.to_string()));
        }
        Ok(resolved)
    }

    /// The file's bytes as an attachment response.
    pub async fn download(&self, filename: &str) -> Result<HttpResponse, FileError> {
        let path = self.resolve(filename).await?;
        let metadata = fs::metadata(&path).await.map_err(|source| FileError::Io {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(FileError::NotFound(filename.to_string()));
        }
        let content = fs::read(&path).await.map_err(|source| FileError::Io {
            path: path.clone(),
            source,
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        let mime_type = mime_guess::from_path(&path).first_or_octet_stream();
        tracing::info!(file = %name, bytes = content.len(), "serving download");

        Ok(HttpResponse::Ok()
            .content_type(mime_type.to_string())
            .insert_header(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(name)],
            })
            .body(content))
    }

    /// Renders the listing page with one download link per entry.
    pub async fn listing_page(&self) -> Result<String, FileError> {
        let files = self.list().await?;
        let template = self.download_template().await;
        Ok(render_listing(&template, &files))
    }

    async fn download_template(&self) -> String {
        let path = self.template_dir.join(DOWNLOAD_PAGE);
        match fs::read_to_string(&path).await {
            Ok(template) => template,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "using built-in download page");
                DEFAULT_DOWNLOAD_PAGE.clone()
            }
        }
    }

    /// Reads a page from the template directory (used for `/index`).
    pub async fn page(&self, file: &str) -> Result<(String, Vec<u8>), FileError> {
        let path = self.template_dir.join(file);
        match fs::read(&path).await {
            Ok(content) => {
                let mime_type = mime_guess::from_path(&path).first_or_octet_stream();
                Ok((mime_type.to_string(), content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::NotFound(file.to_string()))
            }
            Err(source) => Err(FileError::Io { path, source }),
        }
    }
}

pub fn render_listing(template: &str, files: &[String]) -> String {
    let items: String = files
        .iter()
        .map(|name| {
            format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                escape_html(&download_href(name)),
                escape_html(name)
            )
        })
        .collect();
    template.replace(FILES_MARKER, &items)
}

fn download_href(name: &str) -> String {
    format!("{DOWNLOAD_ROUTE}{}", urlencoding::encode(name))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
