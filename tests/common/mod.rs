#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};
use lanmodule::files::FileStore;
use lanmodule::{Credentials, Module, ModuleConfig, PeerDescriptor, Secrets};
use serde_json::json;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "s3cret";

pub fn config(id: &str, peers: Vec<PeerDescriptor>) -> ModuleConfig {
    serde_json::from_value(json!({ "id": id, "modules": peers })).unwrap()
}

/// A module whose storage dir holds `report.txt` and `data.json`, with a
/// `secret.txt` right next to the storage dir.
pub fn module_in(dir: &Path, id: &str, peers: Vec<PeerDescriptor>) -> Module {
    let storage = dir.join("storage");
    let templates = dir.join("templates");
    std::fs::create_dir_all(&storage).unwrap();
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::write(storage.join("report.txt"), "quarterly numbers").unwrap();
    std::fs::write(storage.join("data.json"), r#"{"ok":true}"#).unwrap();
    std::fs::write(dir.join("secret.txt"), "do not serve").unwrap();

    Module::from_parts(
        config(id, peers),
        Secrets::from_credentials(USER, PASSWORD),
        FileStore::new(storage, templates),
    )
    .unwrap()
}

pub fn basic_auth(user: &str, password: &str) -> (&'static str, String) {
    let creds = Credentials {
        username: user.to_string(),
        password: password.to_string(),
    };
    ("Authorization", creds.to_header())
}

pub fn good_auth() -> (&'static str, String) {
    basic_auth(USER, PASSWORD)
}

/// Runs a real module server on an ephemeral port and returns the port.
pub fn spawn_module(module: Module) -> u16 {
    let module = Arc::new(module);
    let server = HttpServer::new(move || {
        let module = module.clone();
        App::new().configure(|cfg| module.configure(cfg))
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();
    let port = server.addrs()[0].port();
    actix_web::rt::spawn(server.run());
    port
}

/// A server whose `/id` answers with something that is not an id document.
pub fn spawn_garbage_peer() -> u16 {
    let server = HttpServer::new(|| {
        App::new().route(
            "/id",
            web::get().to(|| async { HttpResponse::Ok().body("not json") }),
        )
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();
    let port = server.addrs()[0].port();
    actix_web::rt::spawn(server.run());
    port
}

/// A server that answers `/id` with `id`, but only after `delay`.
pub fn spawn_slow_peer(id: &str, delay: Duration) -> u16 {
    let id = id.to_string();
    let server = HttpServer::new(move || {
        let id = id.clone();
        App::new().route(
            "/id",
            web::get().to(move || {
                let id = id.clone();
                async move {
                    actix_web::rt::time::sleep(delay).await;
                    HttpResponse::Ok().json(json!({ "id": id }))
                }
            }),
        )
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();
    let port = server.addrs()[0].port();
    actix_web::rt::spawn(server.run());
    port
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn local_peer(name: &str, port: u16) -> PeerDescriptor {
    PeerDescriptor {
        name: name.to_string(),
        ip: "127.0.0.1".to_string(),
        port,
    }
}
