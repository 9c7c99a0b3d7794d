//! Job executor for worker threads
//!
//! Promise, async and generic jobs go to Boa's `SimpleJobExecutor`. Timer
//! jobs from `setTimeout`/`setInterval` are kept in a deadline heap and only
//! run once due, so a pending timer never blocks the worker's message loop.

use boa_engine::{
    Context, JsResult,
    job::{Job, JobExecutor, SimpleJobExecutor, TimeoutJob},
};
use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::BinaryHeap,
    rc::Rc,
    time::{Duration, Instant},
};

/// A timer entry in the priority queue
struct TimerEntry {
    deadline: Instant,
    job: TimeoutJob,
    /// Breaks ties between timers with the same deadline, in enqueue order
    id: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Event loop state for one worker context
pub(crate) struct WorkerEventLoop {
    jobs: Rc<SimpleJobExecutor>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    next_timer_id: Cell<u64>,
}

impl WorkerEventLoop {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Rc::new(SimpleJobExecutor::new()),
            timers: RefCell::new(BinaryHeap::new()),
            next_timer_id: Cell::new(0),
        }
    }

    /// Time until the earliest timer is due, if any timer is pending
    pub(crate) fn time_until_next_timer(&self) -> Option<Duration> {
        self.timers
            .borrow()
            .peek()
            .map(|entry| entry.deadline.saturating_duration_since(Instant::now()))
    }

    fn pop_due_timer(&self) -> Option<TimeoutJob> {
        let mut timers = self.timers.borrow_mut();
        let due = timers
            .peek()
            .map(|entry| entry.deadline <= Instant::now())
            .unwrap_or(false);
        if due { timers.pop().map(|entry| entry.job) } else { None }
    }
}

impl JobExecutor for WorkerEventLoop {
    fn enqueue_job(self: Rc<Self>, job: Job, context: &mut Context) {
        match job {
            Job::TimeoutJob(job) => {
                let deadline = Instant::now() + Duration::from_millis(job.timeout().as_millis() as u64);
                let id = self.next_timer_id.get();
                self.next_timer_id.set(id + 1);
                self.timers.borrow_mut().push(TimerEntry { deadline, job, id });
            }
            other => Rc::clone(&self.jobs).enqueue_job(other, context),
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        // Drain microtasks first, then every due timer followed by the
        // microtasks it queued
        Rc::clone(&self.jobs).run_jobs(context)?;

        while let Some(job) = self.pop_due_timer() {
            if job.is_cancelled() {
                continue;
            }
            // setInterval re-enqueues itself from inside the callback
            job.call(context)?;
            Rc::clone(&self.jobs).run_jobs(context)?;
        }

        Ok(())
    }
}
