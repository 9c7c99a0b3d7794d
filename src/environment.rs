//! Worker environment capability
//!
//! The factory only talks to workers through these traits. An environment
//! turns a script locator into a running worker; a handle carries messages
//! to it and delivers its message/error events to at most one observer of
//! each kind.

use serde_json::Value;

use crate::runtime::RuntimeError;

/// Observer invoked for every message the worker posts to its creator
pub type MessageObserver = Box<dyn FnMut(MessageEvent) + Send>;

/// Observer invoked for every error the worker reports
pub type ErrorObserver = Box<dyn FnMut(ErrorEvent) + Send>;

/// A message posted by the worker
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub data: Value,
}

/// An error reported by the worker or by the environment on its behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Script evaluation mode for a worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerType {
    #[default]
    Classic,
    Module,
}

/// Options handed verbatim to [`WorkerEnvironment::create`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    pub kind: WorkerType,
    pub name: Option<String>,
    pub credentials: Option<String>,
}

impl WorkerOptions {
    pub fn module() -> Self {
        Self {
            kind: WorkerType::Module,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A live worker as seen from its creator
pub trait WorkerHandle: Send + 'static {
    /// Queue a message for the worker's `onmessage`
    fn post_message(&self, data: Value) -> Result<(), RuntimeError>;

    /// Replace the message observer. `None` unsets it.
    fn set_on_message(&self, observer: Option<MessageObserver>);

    /// Replace the error observer. `None` unsets it.
    fn set_on_error(&self, observer: Option<ErrorObserver>);

    /// Stop the worker. Pending events are discarded.
    fn terminate(&self);
}

/// Creation primitive for workers
pub trait WorkerEnvironment: Send + Sync {
    type Handle: WorkerHandle;

    /// Start a worker from `locator`.
    ///
    /// Only synchronous failures (unknown scheme, unreadable script) are
    /// returned here; anything detected after the worker starts loading,
    /// including policy blocks, arrives later as an error event.
    fn create(&self, locator: &str, options: &WorkerOptions) -> Result<Self::Handle, RuntimeError>;
}
