//! Worker factory
//!
//! Tries each delivery strategy in order. For every attempt:
//! 1. encode the bootstrap script into a locator
//! 2. construct a worker from the locator
//! 3. wait for the worker to announce readiness, or report an error
//!
//! The first attempt that reaches readiness wins: its observers are
//! cleared, the start sentinel is posted and the handle is returned. The
//! locator of every attempt that got past encoding is released exactly
//! once, whatever the outcome.
//!
//! No handshake timeout is applied. A worker that neither announces
//! readiness nor reports an error keeps the creation future pending.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::bootstrap::{BootstrapScript, READY_SENTINEL, START_SENTINEL, WorkerMain, compose};
use crate::environment::{ErrorEvent, MessageEvent, WorkerEnvironment, WorkerHandle, WorkerOptions};
use crate::error::{AttemptFailure, AttemptStage, WorkerError, WorkerResult};
use crate::runtime::{BoaEnvironment, RuntimeConfig};
use crate::strategy::{DeliveryStrategy, StrategyKind, build_strategies};

/// Factory configuration
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Delivery strategies, in the order they are tried
    pub strategies: Vec<StrategyKind>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            strategies: StrategyKind::default_order(),
        }
    }
}

/// Creates confirmed workers from inline main procedures
pub struct WorkerFactory<E: WorkerEnvironment> {
    env: E,
    strategies: Vec<Box<dyn DeliveryStrategy>>,
}

impl WorkerFactory<BoaEnvironment> {
    /// Factory over a fresh [`BoaEnvironment`]. Object URLs are registered in
    /// that environment's blob store.
    pub fn with_config(runtime: RuntimeConfig, config: FactoryConfig) -> Self {
        let env = BoaEnvironment::new(runtime);
        let strategies = build_strategies(&config.strategies, env.blob_store());
        Self::new(env, strategies)
    }
}

impl Default for WorkerFactory<BoaEnvironment> {
    fn default() -> Self {
        Self::with_config(RuntimeConfig::default(), FactoryConfig::default())
    }
}

impl<E: WorkerEnvironment> WorkerFactory<E> {
    pub fn new(env: E, strategies: Vec<Box<dyn DeliveryStrategy>>) -> Self {
        Self { env, strategies }
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Strategy names in attempt order
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Validate `main` as function source and create a worker running it
    pub async fn create_worker(&self, main: &str, options: &WorkerOptions) -> WorkerResult<E::Handle> {
        let main = WorkerMain::parse(main)?;
        self.create_worker_from(&main, options).await
    }

    pub async fn create_worker_from(&self, main: &WorkerMain, options: &WorkerOptions) -> WorkerResult<E::Handle> {
        create_worker(&self.env, &self.strategies, main, options).await
    }
}

/// Run the strategy chain for `main` against `env`
pub async fn create_worker<E: WorkerEnvironment>(
    env: &E,
    strategies: &[Box<dyn DeliveryStrategy>],
    main: &WorkerMain,
    options: &WorkerOptions,
) -> WorkerResult<E::Handle> {
    let script = compose(main);
    let mut failures = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        tracing::debug!(strategy = strategy.name(), "attempting worker delivery");

        match attempt(env, strategy.as_ref(), &script, options).await {
            Ok(handle) => {
                tracing::info!(
                    strategy = strategy.name(),
                    failed_attempts = failures.len(),
                    "worker ready"
                );
                return Ok(handle);
            }
            Err(failure) => {
                tracing::warn!("{}", failure);
                failures.push(failure);
            }
        }
    }

    Err(WorkerError::Exhausted { failures })
}

async fn attempt<E: WorkerEnvironment>(
    env: &E,
    strategy: &dyn DeliveryStrategy,
    script: &BootstrapScript,
    options: &WorkerOptions,
) -> Result<E::Handle, AttemptFailure> {
    let failure = |stage, message: String| AttemptFailure {
        strategy: strategy.name().to_string(),
        stage,
        message,
    };

    // Encode the bootstrap into a locator
    let locator = strategy
        .encode(script)
        .map_err(|e| failure(AttemptStage::Encoding, e.to_string()))?;

    // Construct the worker
    let handle = match env.create(locator.url(), options) {
        Ok(handle) => handle,
        Err(e) => {
            locator.release();
            return Err(failure(AttemptStage::Constructing, e.to_string()));
        }
    };

    // Wait for ready or error; the locator is no longer needed either way
    let outcome = handshake(&handle).await;
    locator.release();

    if let Err(message) = outcome {
        handle.terminate();
        return Err(failure(AttemptStage::Handshake, message));
    }

    // Clear observers before the main procedure can emit anything
    handle.set_on_message(None);
    handle.set_on_error(None);
    if let Err(e) = handle.post_message(Value::from(START_SENTINEL)) {
        handle.terminate();
        return Err(failure(AttemptStage::Handshake, e.to_string()));
    }

    Ok(handle)
}

/// Install single-shot observers and wait for ready or error, whichever
/// comes first.
async fn handshake<H: WorkerHandle>(handle: &H) -> Result<(), String> {
    let (tx, rx) = oneshot::channel::<Result<(), String>>();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let on_error = Arc::clone(&slot);
    handle.set_on_error(Some(Box::new(move |event: ErrorEvent| {
        if let Some(tx) = on_error.lock().take() {
            let _ = tx.send(Err(event.message));
        }
    })));

    let on_message = slot;
    handle.set_on_message(Some(Box::new(move |event: MessageEvent| {
        if event.data.as_str() != Some(READY_SENTINEL) {
            return;
        }
        if let Some(tx) = on_message.lock().take() {
            let _ = tx.send(Ok(()));
        }
    })));

    match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err("worker closed before completing the handshake".to_string()),
    }
}
