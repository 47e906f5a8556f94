//! Base for LAN service modules: a uniform HTTP surface (`/id`, `/api-doc`,
//! gated file downloads, user endpoints built from nested paths) plus
//! discovery of the peer modules listed in the config file.
//!
//! ```no_run
//! use lanmodule::{handler, Module};
//!
//! # async fn run() -> lanmodule::Result<()> {
//! let mut module = Module::new("config/config.json", "templates", "./storage")?;
//! module.register_endpoint(
//!     "v1/coords",
//!     handler("Current coordinates.", |_| Ok(serde_json::json!([52.5, 13.4]))),
//! )?;
//! lanmodule::serve(std::sync::Arc::new(module), "0.0.0.0", 5000).await
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod files;
pub mod module;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use auth::{Access, Credentials, Secrets};
pub use config::{ModuleConfig, PeerDescriptor, Settings};
pub use discovery::PeerMap;
pub use error::{ModuleError, Result};
pub use module::Module;
pub use registry::{handler, ApiHandler, ApiRequest, EndpointTree, HandlerError, RegistryError};
pub use server::serve;
