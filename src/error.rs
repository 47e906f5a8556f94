use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::RegistryError;

pub type Result<T, E = ModuleError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
