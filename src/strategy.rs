//! Delivery strategies
//!
//! A delivery strategy turns bootstrap script text into a locator the
//! worker environment can load. Some locators are backed by a temporary
//! resource (an object URL, a file on disk); those carry a release
//! obligation that runs exactly once.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::bootstrap::BootstrapScript;
use crate::runtime::blob::BlobStore;

/// MIME type used for every encoded script
pub const SCRIPT_MIME: &str = "text/javascript";

/// Errors raised while encoding a script into a locator
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Strategy unavailable: {0}")]
    Unavailable(String),
}

/// A worker-loadable URL plus its cleanup obligation
pub struct Locator {
    url: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Locator {
    /// A locator with nothing to release
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            release: None,
        }
    }

    /// A locator whose backing resource is freed by `release`
    pub fn with_release(url: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            url: url.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn needs_release(&self) -> bool {
        self.release.is_some()
    }

    /// Free the backing resource. Consuming `self` makes a second call impossible.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::trace!(url = %self.url, "releasing locator");
            release();
        }
    }
}

impl Drop for Locator {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("url", &self.url)
            .field("needs_release", &self.needs_release())
            .finish()
    }
}

/// Encodes bootstrap script text into a [`Locator`]
pub trait DeliveryStrategy: Send + Sync {
    /// Short name used in logs and aggregated failures
    fn name(&self) -> &str;

    fn encode(&self, script: &BootstrapScript) -> Result<Locator, EncodeError>;
}

/// `data:text/javascript;base64,...`
#[derive(Debug, Clone, Default)]
pub struct DataUrlStrategy;

impl DeliveryStrategy for DataUrlStrategy {
    fn name(&self) -> &str {
        "data-url"
    }

    fn encode(&self, script: &BootstrapScript) -> Result<Locator, EncodeError> {
        let encoded = STANDARD.encode(script.text().as_bytes());
        Ok(Locator::new(format!("data:{};base64,{}", SCRIPT_MIME, encoded)))
    }
}

/// `blob:` URL registered in a [`BlobStore`], revoked on release
#[derive(Debug, Clone)]
pub struct ObjectUrlStrategy {
    store: Arc<BlobStore>,
}

impl ObjectUrlStrategy {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store }
    }
}

impl DeliveryStrategy for ObjectUrlStrategy {
    fn name(&self) -> &str {
        "object-url"
    }

    fn encode(&self, script: &BootstrapScript) -> Result<Locator, EncodeError> {
        let url = self
            .store
            .create_object_url(script.text().to_string(), SCRIPT_MIME.to_string());
        let store = Arc::clone(&self.store);
        let revoke = url.clone();
        Ok(Locator::with_release(url, move || {
            store.revoke_object_url(&revoke);
        }))
    }
}

/// `file://` URL of a temporary script file, deleted on release
#[derive(Debug, Clone, Default)]
pub struct TempFileStrategy {
    dir: Option<PathBuf>,
}

impl TempFileStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write scripts under `dir` instead of the system temp directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }
}

impl DeliveryStrategy for TempFileStrategy {
    fn name(&self) -> &str {
        "temp-file"
    }

    fn encode(&self, script: &BootstrapScript) -> Result<Locator, EncodeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("inline-worker-").suffix(".js");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(script.text().as_bytes())?;
        file.flush()?;

        let path = file.into_temp_path();
        let url = format!("file://{}", path.display());
        Ok(Locator::with_release(url, move || {
            if let Err(e) = path.close() {
                tracing::warn!("failed to remove temporary worker script: {}", e);
            }
        }))
    }
}

/// Built-in strategy selector, used by configuration and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    DataUrl,
    ObjectUrl,
    TempFile,
}

impl StrategyKind {
    /// Data URLs first, object URLs second.
    pub fn default_order() -> Vec<StrategyKind> {
        vec![StrategyKind::DataUrl, StrategyKind::ObjectUrl]
    }

    pub fn build(self, store: &Arc<BlobStore>) -> Box<dyn DeliveryStrategy> {
        match self {
            StrategyKind::DataUrl => Box::new(DataUrlStrategy),
            StrategyKind::ObjectUrl => Box::new(ObjectUrlStrategy::new(Arc::clone(store))),
            StrategyKind::TempFile => Box::new(TempFileStrategy::new()),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" | "data-url" => Ok(StrategyKind::DataUrl),
            "blob" | "object-url" => Ok(StrategyKind::ObjectUrl),
            "file" | "temp-file" => Ok(StrategyKind::TempFile),
            other => Err(format!(
                "unknown delivery strategy '{}' (expected data, blob or file)",
                other
            )),
        }
    }
}

/// Build the strategy chain for `kinds`, in order
pub fn build_strategies(kinds: &[StrategyKind], store: &Arc<BlobStore>) -> Vec<Box<dyn DeliveryStrategy>> {
    kinds.iter().map(|kind| kind.build(store)).collect()
}
