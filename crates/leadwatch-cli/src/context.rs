use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;

use leadwatch_core::config::Config;
use leadwatch_core::engine::Engine;
use leadwatch_core::store::Store;

/// Where the config lives and how results are printed. Relative storage
/// paths resolve against the config file's directory.
pub struct Ctx {
    pub config_path: PathBuf,
    pub json: bool,
}

impl Ctx {
    pub fn root(&self) -> &Path {
        self.config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    /// File config with environment overrides applied.
    pub fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(&self.config_path)
            .with_context(|| format!("failed to load {}", self.config_path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Just the action store; for commands that never reach a collaborator.
    pub fn store(&self) -> anyhow::Result<Store> {
        let config = self.config()?;
        let path = self.root().join(&config.storage.database);
        Store::open(&path).with_context(|| format!("failed to open {}", path.display()))
    }

    /// Full engine with live HTTP collaborators.
    pub fn engine(&self, shutdown: Option<watch::Receiver<bool>>) -> anyhow::Result<Arc<Engine>> {
        let config = self.config()?;
        let collab = leadwatch_clients::collaborators(&config)?;
        Ok(Arc::new(Engine::build(self.root(), config, collab, shutdown)?))
    }
}

/// Current-thread runtime for one-shot commands.
pub fn block_on<F: std::future::Future>(f: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt.block_on(f))
}
