//! The module itself: identity, secrets, storage, route registry and the
//! peer map, bundled behind one type that the HTTP front end serves.

use std::path::Path;
use std::sync::Arc;

use crate::auth::{Access, Secrets};
use crate::config::{ModuleConfig, PeerDescriptor, Settings};
use crate::discovery::{Discovery, PeerMap};
use crate::error::Result;
use crate::files::FileStore;
use crate::registry::{ApiHandler, EndpointTree, Registry, RegistryError};

pub const DEFAULT_SECRETS_PATH: &str = ".env";

pub struct Module {
    config: ModuleConfig,
    secrets: Secrets,
    files: FileStore,
    registry: Registry,
    discovery: Discovery,
    website: Option<String>,
}

impl Module {
    /// Loads `config_path` and the secrets from `.env` in the working directory.
    pub fn new(
        config_path: impl AsRef<Path>,
        template_dir: impl AsRef<Path>,
        storage_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let config = ModuleConfig::load(config_path)?;
        let secrets = Secrets::load(DEFAULT_SECRETS_PATH);
        let files = FileStore::new(storage_dir.as_ref(), template_dir.as_ref());
        Self::from_parts(config, secrets, files)
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let config = ModuleConfig::load(&settings.config_path)?;
        let secrets = Secrets::load(&settings.secrets_path);
        let files = FileStore::new(&settings.storage_dir, &settings.template_dir);
        Self::from_parts(config, secrets, files)
    }

    pub fn from_parts(config: ModuleConfig, secrets: Secrets, files: FileStore) -> Result<Self> {
        let mut registry = Registry::new();
        registry.add_builtin("id", "Identity of this module.", Access::Open)?;
        registry.add_builtin("api-doc", "Tree of every endpoint of this module.", Access::Open)?;
        registry.add_builtin("download", "Select a file from the storage folder.", Access::Gated)?;
        registry.add_builtin(
            "downloadfiles",
            "Download a file from the storage folder: /downloadfiles/<filename>.",
            Access::Gated,
        )?;
        registry.add_builtin("modules", "Peers found by the last scan.", Access::Open)?;

        tracing::info!(
            id = %config.id,
            storage = %files.storage_dir().display(),
            templates = %files.template_dir().display(),
            "module created"
        );
        Ok(Module {
            config,
            secrets,
            files,
            registry,
            discovery: Discovery::new()?,
            website: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Config entry of the peer called `name`.
    pub fn module_config(&self, name: &str) -> Option<&PeerDescriptor> {
        self.config.module_config(name)
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn website(&self) -> Option<&str> {
        self.website.as_deref()
    }

    /// Serves `handler` under `/path` for GET and POST, and its doc text
    /// under `/path.doc`. `path` may be nested, like `"v1/coords"`.
    pub fn register_endpoint(
        &mut self,
        path: &str,
        handler: Arc<dyn ApiHandler>,
    ) -> Result<(), RegistryError> {
        self.registry.register(path, handler, Access::Open)
    }

    /// Like [`Module::register_endpoint`], behind the Basic-auth gate.
    pub fn register_gated_endpoint(
        &mut self,
        path: &str,
        handler: Arc<dyn ApiHandler>,
    ) -> Result<(), RegistryError> {
        self.registry.register(path, handler, Access::Gated)
    }

    /// Registers every leaf of `tree`; `{"v1": {"coords": h}}` ends up at `/v1/coords`.
    pub fn register_endpoint_tree(&mut self, tree: &EndpointTree) -> Result<usize, RegistryError> {
        self.registry.register_tree(tree, Access::Open)
    }

    /// Serves `file` from the template directory under `/index`.
    pub fn add_website(&mut self, file: &str) -> Result<(), RegistryError> {
        if self.website.is_none() {
            self.registry
                .add_builtin("index", "Website of this module.", Access::Open)?;
        }
        self.website = Some(file.to_string());
        Ok(())
    }

    /// Full documentation payload served by `/api-doc`.
    pub fn api_doc(&self) -> serde_json::Value {
        serde_json::json!({
            "api": self.registry.doc_tree(),
            "paths": self.registry.paths(),
        })
    }

    /// Pings every configured peer once and replaces the peer map.
    pub async fn check_modules_up(&self) -> Arc<PeerMap> {
        self.discovery.scan(&self.config.modules).await
    }

    pub async fn peer_map(&self) -> Option<Arc<PeerMap>> {
        self.discovery.last().await
    }

    pub async fn missing_modules<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        self.discovery.missing(ids).await
    }

    /// Whether every id in `ids` answered during the last scan.
    pub async fn modules_available<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        self.discovery.all_present(ids).await
    }
}
