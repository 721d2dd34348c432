//! Bounded fan-out executor.
//!
//! A fixed pool of worker threads pulls units from one bounded queue.
//! `submit` blocks while the queue is full. The first failing unit's error
//! is kept; once it is recorded, units that have not started yet are
//! drained without running.

use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::metrics::Metrics;

type WorkUnit<E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'static>;

struct Shared<E> {
    failed: AtomicBool,
    first_error: Mutex<Option<E>>,
    executed: AtomicUsize,
    skipped: AtomicUsize,
}

impl<E> Shared<E> {
    fn record_failure(&self, err: E) {
        let mut slot = self.first_error.lock().expect("batch error mutex poisoned");
        if slot.is_none() {
            *slot = Some(err);
        }
        self.failed.store(true, Ordering::SeqCst);
    }
}

pub struct AsyncBatch<E: Send + 'static> {
    sender: Option<SyncSender<WorkUnit<E>>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared<E>>,
    metrics: Option<Arc<Metrics>>,
}

impl<E: Send + 'static> AsyncBatch<E> {
    /// Starts `concurrency` workers (at least one) behind a queue of the
    /// same capacity.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::sync_channel::<WorkUnit<E>>(concurrency);
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            failed: AtomicBool::new(false),
            first_error: Mutex::new(None),
            executed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        });

        let workers = (0..concurrency)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(&rx, &shared))
            })
            .collect();

        Self {
            sender: Some(tx),
            workers,
            shared,
            metrics: None,
        }
    }

    /// Reports executed/skipped unit counts into `metrics` on `wait`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enqueues a unit, blocking while the queue is full.
    pub fn submit<F>(&self, unit: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(Box::new(unit)).is_err() {
            // every worker is gone; only a panic gets here and wait() resumes it
            self.shared.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Whether any unit has failed so far.
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.shared.executed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> usize {
        self.shared.skipped.load(Ordering::SeqCst)
    }

    /// Closes intake, waits for every queued unit to be attempted and
    /// returns the first recorded error.
    pub fn wait(mut self) -> Result<(), E> {
        self.shutdown();
        if let Some(metrics) = &self.metrics {
            metrics.add_units(self.executed() as u64, self.skipped() as u64);
        }
        match self
            .shared
            .first_error
            .lock()
            .expect("batch error mutex poisoned")
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.sender.take();
        let mut panic_payload = None;
        for worker in self.workers.drain(..) {
            if let Err(payload) = worker.join() {
                panic_payload.get_or_insert(payload);
            }
        }
        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }
    }
}

impl<E: Send + 'static> Drop for AsyncBatch<E> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.sender.take();
            return;
        }
        self.shutdown();
    }
}

fn worker_loop<E>(rx: &Mutex<Receiver<WorkUnit<E>>>, shared: &Shared<E>) {
    loop {
        let unit = {
            let rx = rx.lock().expect("batch queue mutex poisoned");
            match rx.recv() {
                Ok(unit) => unit,
                Err(_) => return,
            }
        };

        if shared.failed.load(Ordering::SeqCst) {
            shared.skipped.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        shared.executed.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = unit() {
            shared.record_failure(err);
        }
    }
}
