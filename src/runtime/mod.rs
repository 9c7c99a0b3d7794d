//! Boa-backed worker environment
//!
//! Each worker runs on its own thread with its own Boa context, extended
//! with the WebAPI subset from boa_runtime that makes sense inside a
//! worker:
//! - Console API (routed to `tracing`)
//! - URL API (URL, URLSearchParams)
//! - Text encoding (TextEncoder, TextDecoder)
//! - structuredClone
//! - queueMicrotask
//! - Timers (setTimeout, setInterval, clearTimeout, clearInterval)

use boa_engine::{Context, JsResult, context::ContextBuilder};
use boa_gc::{Finalize, Trace};
use boa_runtime::{
    ConsoleState, Logger,
    extensions::{
        ConsoleExtension, EncodingExtension, MicrotaskExtension, StructuredCloneExtension,
        TimeoutExtension, UrlExtension,
    },
    register_extensions,
};
use std::rc::Rc;
use thiserror::Error;

pub mod blob;
pub mod csp;
pub(crate) mod dispatch;
pub(crate) mod event_loop;
pub mod worker;

pub use blob::BlobStore;
pub use csp::{ContentSecurityPolicy, CspError, CspViolation};
use event_loop::WorkerEventLoop;
pub use worker::{BoaEnvironment, BoaWorker};

/// Errors that can occur in the worker runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error("Invalid worker locator: {0}")]
    InvalidLocator(String),

    #[error("Blob URL not found: {0}")]
    BlobNotFound(String),

    #[error("Worker {0} is no longer running")]
    WorkerClosed(u32),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Configuration shared by every worker an environment creates
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Policy applied to worker script locators; `None` allows everything
    pub csp: Option<ContentSecurityPolicy>,
    /// Origin embedded in object URLs
    pub origin: String,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            csp: None,
            origin: "null".to_string(),
            recursion_limit: 16384,
            stack_size_limit: 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn with_csp(mut self, csp: ContentSecurityPolicy) -> Self {
        self.csp = Some(csp);
        self
    }
}

/// Console logger that forwards worker output to `tracing`
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct WorkerLogger;

impl Logger for WorkerLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::info!(target: "inline_worker::console", "{}", msg);
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::info!(target: "inline_worker::console", "{}", msg);
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::warn!(target: "inline_worker::console", "{}", msg);
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        tracing::error!(target: "inline_worker::console", "{}", msg);
        Ok(())
    }
}

/// Build a fresh context for one worker, driven by its own event loop
pub(crate) fn build_context(config: &RuntimeConfig) -> RuntimeResult<(Context, Rc<WorkerEventLoop>)> {
    let event_loop = Rc::new(WorkerEventLoop::new());

    let mut context = ContextBuilder::default()
        .job_executor(event_loop.clone())
        .build()
        .map_err(|e| RuntimeError::JsError(e.to_string()))?;

    // Same limits for every worker, taken from the environment config
    context
        .runtime_limits_mut()
        .set_recursion_limit(config.recursion_limit);
    context
        .runtime_limits_mut()
        .set_stack_size_limit(config.stack_size_limit);

    // Register the boa_runtime WebAPIs a worker can use
    register_extensions(
        (
            ConsoleExtension(WorkerLogger),
            TimeoutExtension,
            UrlExtension,
            EncodingExtension,
            StructuredCloneExtension,
            MicrotaskExtension,
        ),
        None,
        &mut context,
    )
    .map_err(|e| RuntimeError::JsError(e.to_string()))?;

    Ok((context, event_loop))
}
