//! inline-worker - JavaScript workers from inline function source
//!
//! Turns the source of a JavaScript function into a running worker without
//! a separate script file:
//! - Bootstrap: wraps the function in a ready/start handshake
//! - Strategies: data URLs, object URLs and temp files, tried in order
//! - Factory: falls back across strategies when a Content Security Policy
//!   blocks one, and only hands out workers that proved they are running
//! - Runtime: Boa-backed worker threads with CSP enforcement

pub mod bootstrap;
pub mod cli;
pub mod environment;
pub mod error;
pub mod factory;
pub mod runtime;
pub mod strategy;
pub mod transpiler;

// Re-export commonly used types
pub use bootstrap::{BootstrapScript, READY_SENTINEL, START_SENTINEL, WorkerMain, compose};
pub use environment::{
    ErrorEvent, MessageEvent, WorkerEnvironment, WorkerHandle, WorkerOptions, WorkerType,
};
pub use error::{AttemptFailure, AttemptStage, WorkerError, WorkerResult};
pub use factory::{FactoryConfig, WorkerFactory, create_worker};
pub use runtime::{
    BoaEnvironment, BoaWorker, ContentSecurityPolicy, RuntimeConfig, RuntimeError, RuntimeResult,
};
pub use strategy::{
    DataUrlStrategy, DeliveryStrategy, Locator, ObjectUrlStrategy, StrategyKind, TempFileStrategy,
};
pub use transpiler::{TranspileError, Transpiler};
