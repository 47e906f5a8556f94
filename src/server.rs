use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use actix_cors::Cors;
use actix_web::dev::Service;
use actix_web::{http::header, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};

use crate::auth::{self, guard};
use crate::error::Result;
use crate::module::Module;
use crate::registry::{ApiRequest, Endpoint, HandlerError};

impl Module {
    /// Binds the fixed routes and every registered endpoint onto `cfg`.
    pub fn configure(self: &Arc<Self>, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(self.clone()))
            .route("/id", web::get().to(get_id))
            .route("/api-doc", web::get().to(get_api_doc))
            .route("/download", web::get().to(download_storage))
            .route("/downloadfiles/{filename:.*}", web::get().to(download_storage_file))
            .route("/modules", web::get().to(get_modules));

        if self.website().is_some() {
            cfg.route("/index", web::get().to(get_website));
        }

        for endpoint in self.registry().endpoints() {
            let data_route = {
                let module = self.clone();
                let endpoint = endpoint.clone();
                move |req: HttpRequest, body: web::Bytes| {
                    let module = module.clone();
                    let endpoint = endpoint.clone();
                    async move {
                        let (ep, request, payload) = (&endpoint, &req, &body[..]);
                        guard(endpoint.access, module.secrets(), &req, || async move {
                            call_endpoint(ep, request, payload)
                        })
                        .await
                    }
                }
            };
            let doc_route = {
                let module = self.clone();
                let endpoint = endpoint.clone();
                move |req: HttpRequest| {
                    let module = module.clone();
                    let endpoint = endpoint.clone();
                    async move {
                        let doc = endpoint.handler.doc().to_string();
                        guard(endpoint.access, module.secrets(), &req, || async move {
                            HttpResponse::Ok()
                                .content_type("text/plain; charset=utf-8")
                                .body(doc)
                        })
                        .await
                    }
                }
            };

            cfg.route(&endpoint.path, web::get().to(data_route.clone()))
                .route(&endpoint.path, web::post().to(data_route))
                .route(&format!("{}.doc", endpoint.path), web::get().to(doc_route));
        }
    }
}

fn call_endpoint(endpoint: &Endpoint, req: &HttpRequest, body: &[u8]) -> HttpResponse {
    match build_request(req, body).and_then(|request| endpoint.handler.call(&request)) {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(e) => {
            if let HandlerError::Failed(_) = e {
                tracing::error!(path = %endpoint.path, error = %e, "endpoint handler failed");
            }
            e.error_response()
        }
    }
}

fn build_request(req: &HttpRequest, body: &[u8]) -> Result<ApiRequest, HandlerError> {
    let query: BTreeMap<String, String> = serde_urlencoded::from_str(req.query_string())
        .map_err(|e| HandlerError::BadRequest(format!("invalid query string: {e}")))?;
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice(body)
                .map_err(|e| HandlerError::BadRequest(format!("body is not valid JSON: {e}")))?,
        )
    };
    Ok(ApiRequest {
        method: req.method().to_string(),
        query,
        body,
    })
}

async fn get_id(module: web::Data<Module>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "id": module.id() }))
}

async fn get_api_doc(module: web::Data<Module>) -> HttpResponse {
    HttpResponse::Ok().json(module.api_doc())
}

// `null` until the first scan has run
async fn get_modules(module: web::Data<Module>) -> HttpResponse {
    HttpResponse::Ok().json(module.peer_map().await.as_deref())
}

async fn download_storage(req: HttpRequest, module: web::Data<Module>) -> HttpResponse {
    let files = module.files();
    auth::gate(module.secrets(), &req, || async move {
        match files.listing_page().await {
            Ok(page) => HttpResponse::Ok()
                .content_type("text/html; charset=utf-8")
                .body(page),
            Err(e) => {
                tracing::error!(error = %e, "failed to list storage directory");
                e.error_response()
            }
        }
    })
    .await
}

async fn download_storage_file(
    req: HttpRequest,
    path: web::Path<String>,
    module: web::Data<Module>,
) -> HttpResponse {
    let filename = path.into_inner();
    let (files, name) = (module.files(), filename.as_str());
    auth::gate(module.secrets(), &req, || async move {
        match files.download(name).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "download refused");
                e.error_response()
            }
        }
    })
    .await
}

async fn get_website(module: web::Data<Module>) -> HttpResponse {
    let Some(file) = module.website() else {
        return HttpResponse::NotFound().finish();
    };
    match module.files().page(file).await {
        Ok((content_type, content)) => HttpResponse::Ok().content_type(content_type).body(content),
        Err(e) => e.error_response(),
    }
}

fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600)
}

/// Serves `module` until the server stops.
pub async fn serve(module: Arc<Module>, host: &str, port: u16) -> Result<()> {
    tracing::info!(id = %module.id(), host, port, "starting http server");
    HttpServer::new(move || {
        let module = module.clone();
        App::new()
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let path = req.path().to_string();
                let start = Instant::now();
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    tracing::info!(
                        %method,
                        %path,
                        status = res.status().as_u16(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "request"
                    );
                    Ok(res)
                }
            })
            .wrap(cors())
            .configure(|cfg| module.configure(cfg))
    })
    .bind((host, port))?
    .run()
    .await?;
    Ok(())
}
