//! Event delivery from a worker to its creator's observers
//!
//! Each worker gets one dispatcher thread. Worker events and observer
//! changes travel through the same channel, so an observer swap is ordered
//! with respect to the events around it. Events that arrive while no
//! observer of their kind is installed are held and handed, in order, to
//! the next observer installed (MessagePort queue-until-started
//! semantics). At most [`HELD_EVENT_LIMIT`] events of each kind are held;
//! later ones are dropped so the earliest, usually the first error, survive.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::environment::{ErrorEvent, ErrorObserver, MessageEvent, MessageObserver};

/// Events of one kind held while no observer is installed
pub(crate) const HELD_EVENT_LIMIT: usize = 1024;

pub(crate) enum DispatchCommand {
    Message(MessageEvent),
    Error(ErrorEvent),
    SetOnMessage(Option<MessageObserver>),
    SetOnError(Option<ErrorObserver>),
    /// Drop observers and any held events
    Close,
}

/// Start the dispatcher thread for worker `id`
pub(crate) fn spawn_dispatcher(id: u32) -> std::io::Result<Sender<DispatchCommand>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("worker-{}-events", id))
        .spawn(move || run(id, rx))?;
    Ok(tx)
}

struct Observers {
    id: u32,
    on_message: Option<MessageObserver>,
    on_error: Option<ErrorObserver>,
    held_messages: Held<MessageEvent>,
    held_errors: Held<ErrorEvent>,
}

impl Observers {
    fn new(id: u32) -> Self {
        Self {
            id,
            on_message: None,
            on_error: None,
            held_messages: Held::new(),
            held_errors: Held::new(),
        }
    }

    fn message(&mut self, event: MessageEvent) {
        match self.on_message.as_mut() {
            Some(observer) => observer(event),
            None => self.held_messages.push(self.id, event),
        }
    }

    fn error(&mut self, event: ErrorEvent) {
        match self.on_error.as_mut() {
            Some(observer) => observer(event),
            None => self.held_errors.push(self.id, event),
        }
    }

    fn set_on_message(&mut self, observer: Option<MessageObserver>) {
        self.on_message = observer;
        if let Some(observer) = self.on_message.as_mut() {
            for event in self.held_messages.drain() {
                observer(event);
            }
        }
    }

    fn set_on_error(&mut self, observer: Option<ErrorObserver>) {
        self.on_error = observer;
        if let Some(observer) = self.on_error.as_mut() {
            for event in self.held_errors.drain() {
                observer(event);
            }
        }
    }
}

/// Events of one kind waiting for an observer
struct Held<T> {
    events: VecDeque<T>,
    dropped: usize,
}

impl<T> Held<T> {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            dropped: 0,
        }
    }

    fn push(&mut self, id: u32, event: T) {
        if self.events.len() < HELD_EVENT_LIMIT {
            self.events.push_back(event);
            return;
        }
        if self.dropped == 0 {
            tracing::warn!(worker = id, "no observer installed, dropping further worker events");
        }
        self.dropped += 1;
    }

    fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, T> {
        self.dropped = 0;
        self.events.drain(..)
    }
}

fn run(id: u32, rx: Receiver<DispatchCommand>) {
    let mut observers = Observers::new(id);

    for command in rx {
        match command {
            DispatchCommand::Message(event) => observers.message(event),
            DispatchCommand::Error(event) => {
                tracing::debug!(worker = id, "error event: {}", event.message);
                observers.error(event)
            }
            DispatchCommand::SetOnMessage(observer) => observers.set_on_message(observer),
            DispatchCommand::SetOnError(observer) => observers.set_on_error(observer),
            DispatchCommand::Close => break,
        }
    }

    tracing::trace!(worker = id, "event dispatcher stopped");
}
