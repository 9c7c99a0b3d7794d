//! Worker threads backed by Boa
//!
//! `BoaEnvironment::create` resolves a locator to script text, then starts
//! one thread running an isolated Boa context. The worker sees the usual
//! globals:
//! - self / globalThis
//! - postMessage(data) - send a message to the creator
//! - onmessage / onerror - assignable handlers
//! - close() - stop the worker from inside
//! - name - the `name` worker option
//! - setTimeout / setInterval - timers run between messages
//!
//! Messages travel as JSON values in both directions.

use boa_engine::{
    Context, JsError, JsNativeError, JsResult, JsValue, NativeFunction, Source,
    builtins::promise::PromiseState, js_string, module::Module, object::ObjectInitializer,
    property::Attribute,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;

use super::blob::BlobStore;
use super::csp::CspViolation;
use super::dispatch::{DispatchCommand, spawn_dispatcher};
use super::{RuntimeConfig, RuntimeError, RuntimeResult, build_context};
use crate::environment::{
    ErrorEvent, ErrorObserver, MessageEvent, MessageObserver, WorkerEnvironment, WorkerHandle,
    WorkerOptions, WorkerType,
};

/// MIME types a worker script may be served as
const JAVASCRIPT_MIME_TYPES: [&str; 4] = [
    "text/javascript",
    "application/javascript",
    "text/ecmascript",
    "application/ecmascript",
];

/// Messages from the creator to a worker
enum Inbound {
    Message(Value),
    Terminate,
}

thread_local! {
    /// Event channel of the worker running on this thread
    static OUTBOUND: RefCell<Option<Sender<DispatchCommand>>> = const { RefCell::new(None) };
    /// Set by `self.close()`
    static CLOSE_REQUESTED: Cell<bool> = const { Cell::new(false) };
}

fn emit(command: DispatchCommand) {
    OUTBOUND.with(|outbound| {
        if let Some(tx) = outbound.borrow().as_ref() {
            let _ = tx.send(command);
        }
    });
}

// ============================================================================
// Environment
// ============================================================================

/// Worker environment running each worker in its own Boa context
pub struct BoaEnvironment {
    config: Arc<RuntimeConfig>,
    blobs: Arc<BlobStore>,
    next_id: AtomicU32,
}

impl BoaEnvironment {
    pub fn new(config: RuntimeConfig) -> Self {
        let blobs = Arc::new(BlobStore::new(config.origin.clone()));
        Self {
            config: Arc::new(config),
            blobs,
            next_id: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Object URL registry this environment resolves `blob:` locators against
    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    fn load_script(&self, locator: &str) -> RuntimeResult<String> {
        // Handle data: URLs
        if let Some(rest) = locator.strip_prefix("data:") {
            return decode_data_url(rest);
        }

        // Handle blob: URLs
        if locator.starts_with("blob:") {
            let entry = self
                .blobs
                .resolve(locator)
                .ok_or_else(|| RuntimeError::BlobNotFound(locator.to_string()))?;
            check_mime(&entry.content_type)?;
            return Ok(entry.content);
        }

        // Everything else must be a file on disk
        let path = if let Some(path) = locator.strip_prefix("file://") {
            PathBuf::from(path)
        } else if has_scheme(locator) {
            return Err(RuntimeError::InvalidLocator(format!(
                "unsupported scheme in '{}'",
                locator
            )));
        } else {
            PathBuf::from(locator)
        };

        if !path.exists() {
            return Err(RuntimeError::InvalidLocator(format!(
                "worker script not found: {}",
                path.display()
            )));
        }
        Ok(std::fs::read_to_string(&path)?)
    }
}

impl Default for BoaEnvironment {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl WorkerEnvironment for BoaEnvironment {
    type Handle = BoaWorker;

    fn create(&self, locator: &str, options: &WorkerOptions) -> RuntimeResult<BoaWorker> {
        // Resolve the script up front so bad locators fail synchronously
        let code = self.load_script(locator)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let events = spawn_dispatcher(id)?;
        let (inbox_tx, inbox_rx) = mpsc::channel();

        // Policy blocks surface later as an error event, like in browsers
        let blocked = self
            .config
            .csp
            .as_ref()
            .and_then(|csp| csp.check_worker(locator).err());

        let worker = WorkerThread {
            id,
            code,
            options: options.clone(),
            config: Arc::clone(&self.config),
            events: events.clone(),
            inbox: inbox_rx,
            blocked,
        };

        // Spawn worker thread
        thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker.run())?;

        tracing::debug!(worker = id, kind = ?options.kind, "worker thread started");

        Ok(BoaWorker {
            id,
            url: locator.to_string(),
            inbox: inbox_tx,
            events,
        })
    }
}

fn has_scheme(locator: &str) -> bool {
    match locator.find(':') {
        // single letters are Windows drive prefixes
        Some(idx) if idx > 1 => locator[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

fn check_mime(content_type: &str) -> RuntimeResult<()> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if JAVASCRIPT_MIME_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(RuntimeError::InvalidLocator(format!(
            "refusing to run a worker script with MIME type '{}'",
            content_type
        )))
    }
}

/// Decode the part of a `data:` URL after the scheme
fn decode_data_url(rest: &str) -> RuntimeResult<String> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| RuntimeError::InvalidLocator("data URL without payload".to_string()))?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };
    check_mime(mime)?;

    if !is_base64 {
        return Ok(payload.to_string());
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| RuntimeError::InvalidLocator(format!("invalid base64 payload: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| RuntimeError::InvalidLocator(format!("script is not UTF-8: {}", e)))
}

// ============================================================================
// Handle
// ============================================================================

/// Creator-side handle to a Boa worker
pub struct BoaWorker {
    id: u32,
    url: String,
    inbox: Sender<Inbound>,
    events: Sender<DispatchCommand>,
}

impl BoaWorker {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Locator the worker was created from
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for BoaWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoaWorker").field("id", &self.id).finish()
    }
}

impl WorkerHandle for BoaWorker {
    fn post_message(&self, data: Value) -> RuntimeResult<()> {
        self.inbox
            .send(Inbound::Message(data))
            .map_err(|_| RuntimeError::WorkerClosed(self.id))
    }

    fn set_on_message(&self, observer: Option<MessageObserver>) {
        let _ = self.events.send(DispatchCommand::SetOnMessage(observer));
    }

    fn set_on_error(&self, observer: Option<ErrorObserver>) {
        let _ = self.events.send(DispatchCommand::SetOnError(observer));
    }

    fn terminate(&self) {
        tracing::debug!(worker = self.id, "terminating worker");
        let _ = self.inbox.send(Inbound::Terminate);
        let _ = self.events.send(DispatchCommand::Close);
    }
}

// ============================================================================
// Worker Thread Implementation
// ============================================================================

struct WorkerThread {
    id: u32,
    code: String,
    options: WorkerOptions,
    config: Arc<RuntimeConfig>,
    events: Sender<DispatchCommand>,
    inbox: Receiver<Inbound>,
    blocked: Option<CspViolation>,
}

impl WorkerThread {
    fn run(self) {
        let span = tracing::debug_span!(
            "worker",
            id = self.id,
            name = self.options.name.as_deref().unwrap_or("")
        );
        let _entered = span.enter();

        OUTBOUND.with(|outbound| *outbound.borrow_mut() = Some(self.events.clone()));
        CLOSE_REQUESTED.with(|close| close.set(false));

        if let Some(violation) = &self.blocked {
            tracing::warn!("{}", violation);
            emit_error(violation.to_string());
        } else {
            self.execute();
        }

        OUTBOUND.with(|outbound| outbound.borrow_mut().take());
        tracing::debug!("worker thread finished");
    }

    fn execute(&self) {
        // Create an isolated runtime for this worker
        let (mut context, event_loop) = match build_context(&self.config) {
            Ok(c) => c,
            Err(e) => {
                emit_error(format!("Failed to create runtime: {}", e));
                return;
            }
        };

        if let Err(e) = register_worker_globals(&mut context, &self.options) {
            emit_error(format!("Failed to register worker globals: {}", e));
            return;
        }

        // Execute the worker script
        let evaluated = match self.options.kind {
            WorkerType::Classic => context
                .eval(Source::from_bytes(self.code.as_bytes()))
                .map(|_| ()),
            WorkerType::Module => evaluate_module(&mut context, &self.code),
        };
        if let Err(e) = evaluated {
            report_uncaught(&mut context, e);
        }
        run_jobs(&mut context);

        // Worker event loop: wait for a message or the next timer
        while !close_requested() {
            let received = match event_loop.time_until_next_timer() {
                Some(wait) => self.inbox.recv_timeout(wait),
                None => self.inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(Inbound::Terminate) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Inbound::Message(data)) => {
                    if let Err(e) = dispatch_message(&mut context, &data) {
                        report_uncaught(&mut context, e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            run_jobs(&mut context);
        }
    }
}

/// Run pending jobs and due timers, reporting a throwing callback
fn run_jobs(context: &mut Context) {
    if let Err(e) = context.run_jobs() {
        report_uncaught(context, e);
    }
}

fn close_requested() -> bool {
    CLOSE_REQUESTED.with(|close| close.get())
}

fn emit_error(message: String) {
    emit(DispatchCommand::Error(ErrorEvent { message }));
}

fn evaluate_module(context: &mut Context, code: &str) -> JsResult<()> {
    let module = Module::parse(Source::from_bytes(code.as_bytes()), None, context)?;
    let promise = module.load_link_evaluate(context);
    context.run_jobs()?;

    match promise.state() {
        PromiseState::Rejected(err) => Err(JsError::from_opaque(err)),
        _ => Ok(()),
    }
}

/// Call `self.onmessage({ data })` if a handler is installed
fn dispatch_message(context: &mut Context, data: &Value) -> JsResult<()> {
    let handler = context
        .global_object()
        .get(js_string!("onmessage"), context)?;
    let Some(handler) = handler.as_callable() else {
        return Ok(());
    };

    // Build the MessageEvent-like object
    let data = JsValue::from_json(data, context)?;
    let event = ObjectInitializer::new(context)
        .property(js_string!("type"), js_string!("message"), Attribute::all())
        .property(js_string!("data"), data, Attribute::all())
        .build();

    handler.call(&JsValue::undefined(), &[event.into()], context)?;
    Ok(())
}

/// Give `self.onerror` a chance to handle an uncaught exception, then
/// forward it to the creator unless the handler returned `true`.
fn report_uncaught(context: &mut Context, error: JsError) {
    let message = format!("Uncaught {}", error);

    let handler = context
        .global_object()
        .get(js_string!("onerror"), context)
        .unwrap_or_else(|_| JsValue::undefined());
    let handled = match handler.as_callable() {
        Some(handler) => {
            let arg = JsValue::from(js_string!(message.as_str()));
            matches!(
                handler.call(&JsValue::undefined(), &[arg], context),
                Ok(result) if result.as_boolean() == Some(true)
            )
        }
        None => false,
    };

    if handled {
        tracing::debug!("uncaught error handled inside worker: {}", message);
    } else {
        emit_error(message);
    }
}

/// `__worker_post_message(data)` - worker to creator
fn post_to_creator(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let data = args.first().cloned().unwrap_or_else(JsValue::undefined);

    // Messages cross the thread boundary as JSON
    let value = match data.to_json(context) {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(e) => {
            return Err(JsNativeError::typ()
                .with_message(format!("DataCloneError: could not clone message: {}", e))
                .into());
        }
    };

    emit(DispatchCommand::Message(MessageEvent { data: value }));
    Ok(JsValue::undefined())
}

/// `__worker_close()` - stop after the current task
fn close_worker(_this: &JsValue, _args: &[JsValue], _context: &mut Context) -> JsResult<JsValue> {
    CLOSE_REQUESTED.with(|close| close.set(true));
    Ok(JsValue::undefined())
}

/// Register worker-specific globals (self, postMessage, etc.)
fn register_worker_globals(context: &mut Context, options: &WorkerOptions) -> JsResult<()> {
    context.register_global_callable(
        js_string!("__worker_post_message"),
        1,
        NativeFunction::from_fn_ptr(post_to_creator),
    )?;
    context.register_global_callable(
        js_string!("__worker_close"),
        0,
        NativeFunction::from_fn_ptr(close_worker),
    )?;

    let name = Value::from(options.name.clone().unwrap_or_default());
    let worker_globals = format!(
        r#"
        globalThis.self = globalThis;

        self.postMessage = function(data) {{
            __worker_post_message(data);
        }};

        self.onmessage = null;
        self.onerror = null;
        self.name = {name};

        self.close = function() {{
            __worker_close();
        }};

        self.importScripts = function() {{
            throw new Error("importScripts is not supported in inline workers");
        }};
        "#,
        name = name
    );

    context.eval(Source::from_bytes(worker_globals.as_bytes()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContentSecurityPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn data_url(code: &str) -> String {
        format!("data:text/javascript;base64,{}", STANDARD.encode(code))
    }

    fn observe_messages(worker: &BoaWorker) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel();
        worker.set_on_message(Some(Box::new(move |e: MessageEvent| {
            let _ = tx.send(e.data);
        })));
        rx
    }

    fn observe_errors(worker: &BoaWorker) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        worker.set_on_error(Some(Box::new(move |e: ErrorEvent| {
            let _ = tx.send(e.message);
        })));
        rx
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_decode_data_urls() {
        assert_eq!(
            decode_data_url("text/javascript;base64,cG9zdE1lc3NhZ2UoMSk=").unwrap(),
            "postMessage(1)"
        );
        assert_eq!(
            decode_data_url("application/javascript,postMessage(1)").unwrap(),
            "postMessage(1)"
        );
        assert!(decode_data_url("text/html;base64,AA==").is_err());
        assert!(decode_data_url("text/javascript;base64").is_err());
        assert!(decode_data_url("text/javascript;base64,@@@").is_err());
    }

    #[test]
    fn test_echo_worker() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(
                &data_url("onmessage = (e) => postMessage({ doubled: e.data * 2 });"),
                &WorkerOptions::default(),
            )
            .unwrap();
        let messages = observe_messages(&worker);

        worker.post_message(json!(21)).unwrap();
        assert_eq!(messages.recv_timeout(WAIT).unwrap(), json!({ "doubled": 42 }));
        worker.terminate();
    }

    #[test]
    fn test_blob_locator() {
        let env = BoaEnvironment::default();
        let url = env
            .blob_store()
            .create_object_url("postMessage(self.name)".into(), "text/javascript".into());
        let worker = env
            .create(&url, &WorkerOptions::default().with_name("blobby"))
            .unwrap();

        assert_eq!(observe_messages(&worker).recv_timeout(WAIT).unwrap(), json!("blobby"));
    }

    #[test]
    fn test_file_locator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.js");
        std::fs::write(&path, "postMessage('from file')").unwrap();

        let env = BoaEnvironment::default();
        let worker = env
            .create(&format!("file://{}", path.display()), &WorkerOptions::default())
            .unwrap();
        assert_eq!(
            observe_messages(&worker).recv_timeout(WAIT).unwrap(),
            json!("from file")
        );
    }

    #[test]
    fn test_module_worker() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(
                &data_url("const answer = 42; export default answer; postMessage(answer);"),
                &WorkerOptions::module(),
            )
            .unwrap();
        assert_eq!(observe_messages(&worker).recv_timeout(WAIT).unwrap(), json!(42));
    }

    #[test]
    fn test_synchronous_failures() {
        let env = BoaEnvironment::default();
        let options = WorkerOptions::default();

        assert!(matches!(
            env.create("blob:null/missing", &options),
            Err(RuntimeError::BlobNotFound(_))
        ));
        assert!(matches!(
            env.create("https://example.com/w.js", &options),
            Err(RuntimeError::InvalidLocator(_))
        ));
        assert!(matches!(
            env.create("/definitely/not/here.js", &options),
            Err(RuntimeError::InvalidLocator(_))
        ));
    }

    #[test]
    fn test_uncaught_errors_reported() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(&data_url("throw new Error('boom')"), &WorkerOptions::default())
            .unwrap();

        let message = observe_errors(&worker).recv_timeout(WAIT).unwrap();
        assert!(message.starts_with("Uncaught"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_worker_onerror_can_handle() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(
                &data_url(
                    "self.onerror = () => true; \
                     onmessage = (e) => { if (e.data === 'throw') throw new Error('x'); postMessage('alive'); };",
                ),
                &WorkerOptions::default(),
            )
            .unwrap();
        let errors = observe_errors(&worker);
        let messages = observe_messages(&worker);

        worker.post_message(json!("throw")).unwrap();
        worker.post_message(json!("ping")).unwrap();
        assert_eq!(messages.recv_timeout(WAIT).unwrap(), json!("alive"));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_csp_block_is_asynchronous() {
        let csp = ContentSecurityPolicy::parse("worker-src blob:").unwrap();
        let env = BoaEnvironment::new(RuntimeConfig::default().with_csp(csp));

        let worker = env
            .create(&data_url("postMessage('should not run')"), &WorkerOptions::default())
            .unwrap();
        let errors = observe_errors(&worker);
        let messages = observe_messages(&worker);

        let message = errors.recv_timeout(WAIT).unwrap();
        assert!(message.starts_with("Refused to create a worker from 'data:"));
        assert!(message.contains("worker-src blob:"));
        assert!(messages.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_timers_run_between_messages() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(
                &data_url(
                    "let ticks = 0; \
                     const id = setInterval(() => { ticks++; if (ticks === 3) { clearInterval(id); postMessage('ticks:' + ticks); } }, 5); \
                     onmessage = (e) => setTimeout(() => postMessage('late:' + e.data), 10);",
                ),
                &WorkerOptions::default(),
            )
            .unwrap();
        let messages = observe_messages(&worker);

        worker.post_message(json!("ping")).unwrap();
        let mut seen = vec![
            messages.recv_timeout(WAIT).unwrap(),
            messages.recv_timeout(WAIT).unwrap(),
        ];
        seen.sort_by_key(|v| v.to_string());
        assert_eq!(seen, [json!("late:ping"), json!("ticks:3")]);
        worker.terminate();
    }

    #[test]
    fn test_throwing_timer_reported() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(
                &data_url("setTimeout(() => { throw new Error('tick failed') }, 1)"),
                &WorkerOptions::default(),
            )
            .unwrap();

        let message = observe_errors(&worker).recv_timeout(WAIT).unwrap();
        assert!(message.starts_with("Uncaught"));
        assert!(message.contains("tick failed"));
    }

    #[test]
    fn test_close_from_inside() {
        let env = BoaEnvironment::default();
        let worker = env
            .create(
                &data_url("onmessage = () => { postMessage('bye'); close(); };"),
                &WorkerOptions::default(),
            )
            .unwrap();
        let messages = observe_messages(&worker);

        worker.post_message(json!(null)).unwrap();
        assert_eq!(messages.recv_timeout(WAIT).unwrap(), json!("bye"));

        // the worker loop exits, so its inbox closes shortly after
        let mut closed = false;
        for _ in 0..100 {
            if worker.post_message(json!(null)).is_err() {
                closed = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(closed);
    }
}
