//! Parallel host device
//!
//! A dedicated worker thread drains an in-order command queue. Each command may
//! fan out over a rayon thread pool owned by the worker, so commands run one at a
//! time in submission order while the work inside each one is data-parallel.
//!
//! Submission never blocks. Every command gets a monotonically increasing ticket;
//! a [`CompletionSignal`] covers a range of tickets and [`HostContext::wait`]
//! blocks until the last of them has run.

use crate::error::{EngineError, Result};
use crate::stage::Stage;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Work item executed on the queue worker
pub type Command = Box<dyn FnOnce(&rayon::ThreadPool) + Send + 'static>;

/// Number of recent command failures remembered for signal resolution
const FAILURE_HISTORY: usize = 64;

enum Message {
    Run {
        ticket: u64,
        stage: Stage,
        command: Command,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
struct Failure {
    ticket: u64,
    stage: Stage,
    message: String,
}

#[derive(Debug)]
struct Progress {
    completed: u64,
    worker_alive: bool,
    failures: VecDeque<Failure>,
}

#[derive(Debug)]
struct Shared {
    progress: Mutex<Progress>,
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock()
    }

    fn wait_until(&self, ticket: u64) -> Result<MutexGuard<'_, Progress>> {
        let mut progress = self.lock();
        while progress.completed < ticket {
            if !progress.worker_alive {
                return Err(EngineError::WaitFailure(format!(
                    "host queue stopped before ticket {ticket}"
                )));
            }
            self.done.wait(&mut progress);
        }
        Ok(progress)
    }
}

/// Handle to a range of submitted commands
///
/// Resolves once the command with ticket `last` has run. Resolution fails if any
/// command in `first..=last` panicked. The signal keeps the queue's progress
/// state alive, so it can be waited on without the context at hand.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    first: u64,
    last: u64,
    shared: Arc<Shared>,
}

impl CompletionSignal {
    /// Ticket of the final command covered by this signal
    #[must_use]
    pub fn ticket(&self) -> u64 {
        self.last
    }

    /// Ticket the covered range starts after
    pub(crate) fn after(&self) -> u64 {
        self.first - 1
    }

    /// True once every covered command has run, without blocking
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let progress = self.shared.lock();
        progress.completed >= self.last || !progress.worker_alive
    }

    /// Block until the signal resolves
    ///
    /// # Errors
    /// Returns [`EngineError::WaitFailure`] if a covered command panicked or the
    /// worker stopped before reaching the signal
    pub fn wait(&self) -> Result<()> {
        let mut progress = self.shared.wait_until(self.last)?;
        if let Some(failure) = progress
            .failures
            .iter()
            .find(|f| (self.first..=self.last).contains(&f.ticket))
        {
            return Err(EngineError::WaitFailure(format!(
                "{} (ticket {}) panicked: {}",
                failure.stage, failure.ticket, failure.message
            )));
        }
        // Failures at or before this signal can no longer be observed
        progress.failures.retain(|f| f.ticket > self.last);
        Ok(())
    }
}

/// In-order command queue backed by a worker thread and a rayon pool
#[derive(Debug)]
pub struct HostContext {
    id: u64,
    threads: usize,
    sender: Option<mpsc::Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    next_ticket: AtomicU64,
}

impl HostContext {
    /// Start the queue worker
    ///
    /// # Arguments
    ///
    /// * `id` - Context identifier used to match engines to their context
    /// * `threads` - Size of the kernel pool, `None` for one thread per core
    ///
    /// # Errors
    /// Returns [`EngineError::ContextUnavailable`] if the pool or worker thread
    /// cannot be started
    pub(crate) fn new(id: u64, threads: Option<usize>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|i| format!("fire-kernel-{i}"))
            .build()
            .map_err(|e| EngineError::ContextUnavailable(format!("kernel pool: {e}")))?;
        let threads = pool.current_num_threads();

        let shared = Arc::new(Shared {
            progress: Mutex::new(Progress {
                completed: 0,
                worker_alive: true,
                failures: VecDeque::with_capacity(FAILURE_HISTORY),
            }),
            done: Condvar::new(),
        });

        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("fire-host-queue".into())
            .spawn(move || run_queue(&receiver, &pool, &worker_shared))
            .map_err(|e| EngineError::ContextUnavailable(format!("queue worker: {e}")))?;

        info!("Host execution context started with {} kernel threads", threads);

        Ok(Self {
            id,
            threads,
            sender: Some(sender),
            worker: Some(worker),
            shared,
            next_ticket: AtomicU64::new(0),
        })
    }

    /// Context identifier
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of threads in the kernel pool
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Ticket of the most recently submitted command (0 before any submission)
    #[must_use]
    pub fn last_ticket(&self) -> u64 {
        self.next_ticket.load(Ordering::Acquire)
    }

    /// Enqueue `command`; returns its ticket without waiting for it to run
    ///
    /// # Errors
    /// Returns [`EngineError::SubmissionFailure`] once the worker has stopped
    pub fn submit(&self, stage: Stage, command: Command) -> Result<u64> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::submission(stage, "host queue is shut down"))?;
        if !self.shared.lock().worker_alive {
            return Err(EngineError::submission(stage, "host queue worker has stopped"));
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::AcqRel) + 1;
        sender
            .send(Message::Run {
                ticket,
                stage,
                command,
            })
            .map_err(|_| EngineError::submission(stage, "host queue worker has stopped"))?;
        Ok(ticket)
    }

    /// Signal covering every command submitted after `after` up to now
    #[must_use]
    pub fn signal_since(&self, after: u64) -> CompletionSignal {
        // With nothing submitted since `after` the covered range is empty
        CompletionSignal {
            first: after + 1,
            last: self.last_ticket().max(after),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Block until `signal` resolves
    ///
    /// # Errors
    /// Returns [`EngineError::WaitFailure`] if a covered command panicked or the
    /// worker stopped before reaching the signal
    pub fn wait(&self, signal: &CompletionSignal) -> Result<()> {
        signal.wait()
    }

    /// Block until every submitted command has run
    ///
    /// # Errors
    /// Returns [`EngineError::WaitFailure`] if the worker stopped early
    pub fn drain(&self) -> Result<()> {
        self.shared.wait_until(self.last_ticket()).map(drop)
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        // Shutdown is queued behind any outstanding work, so the worker drains first
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Message::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Host queue worker panicked during shutdown");
            }
        }
        debug!("Host execution context {} destroyed", self.id);
    }
}

fn run_queue(receiver: &mpsc::Receiver<Message>, pool: &rayon::ThreadPool, shared: &Shared) {
    while let Ok(message) = receiver.recv() {
        let Message::Run {
            ticket,
            stage,
            command,
        } = message
        else {
            break;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| command(pool)));

        let mut progress = shared.lock();
        progress.completed = ticket;
        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            error!(stage = %stage, ticket, "Host command panicked: {}", message);
            if progress.failures.len() == FAILURE_HISTORY {
                progress.failures.pop_front();
            }
            progress.failures.push_back(Failure {
                ticket,
                stage,
                message,
            });
        }
        drop(progress);
        shared.done.notify_all();
    }

    shared.lock().worker_alive = false;
    shared.done.notify_all();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn context() -> HostContext {
        HostContext::new(1, Some(2)).unwrap()
    }

    #[test]
    fn test_commands_run_in_order() {
        let ctx = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..32 {
            let log = Arc::clone(&log);
            ctx.submit(
                Stage::Propagation,
                Box::new(move |_| log.lock().push(i)),
            )
            .unwrap();
        }
        ctx.drain().unwrap();
        assert_eq!(*log.lock(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_does_not_block() {
        let ctx = context();
        let (release, gate) = mpsc::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        ctx.submit(
            Stage::Propagation,
            Box::new(move |_| {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }),
        )
        .unwrap();
        let counter = Arc::clone(&ran);
        ctx.submit(
            Stage::HostCopy,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        // The second command is queued behind the blocked first one
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        release.send(()).unwrap();

        let signal = ctx.signal_since(0);
        ctx.wait(&signal).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_commands_use_pool() {
        let ctx = context();
        let threads = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&threads);
        ctx.submit(
            Stage::SelfTest,
            Box::new(move |pool| {
                seen.store(pool.current_num_threads(), Ordering::SeqCst);
            }),
        )
        .unwrap();
        ctx.drain().unwrap();
        assert_eq!(threads.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.threads(), 2);
    }

    #[test]
    fn test_panicking_command_fails_its_signal_only() {
        let ctx = context();
        let before = ctx.last_ticket();
        ctx.submit(Stage::Propagation, Box::new(|_| panic!("kernel fault")))
            .unwrap();
        let failed = ctx.signal_since(before);
        let err = ctx.wait(&failed).unwrap_err();
        assert!(matches!(err, EngineError::WaitFailure(ref m) if m.contains("kernel fault")));

        // The queue keeps running after a failed command
        let before = ctx.last_ticket();
        ctx.submit(Stage::HostCopy, Box::new(|_| {})).unwrap();
        ctx.wait(&ctx.signal_since(before)).unwrap();
    }

    #[test]
    fn test_lock_held_by_panicking_command_stays_usable() {
        let ctx = context();
        let buffer = Arc::new(Mutex::new(vec![0.0_f32; 4]));

        let target = Arc::clone(&buffer);
        let before = ctx.last_ticket();
        ctx.submit(
            Stage::Propagation,
            Box::new(move |_| {
                let mut data = target.lock();
                data[0] = 1.0;
                panic!("fault while holding the buffer");
            }),
        )
        .unwrap();
        assert!(ctx.wait(&ctx.signal_since(before)).is_err());

        let target = Arc::clone(&buffer);
        let before = ctx.last_ticket();
        ctx.submit(Stage::Upload, Box::new(move |_| target.lock()[1] = 2.0))
            .unwrap();
        ctx.wait(&ctx.signal_since(before)).unwrap();
        assert_eq!(*buffer.lock(), vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_signal_range_start() {
        let ctx = context();
        ctx.submit(Stage::Clear, Box::new(|_| {})).unwrap();
        let signal = ctx.signal_since(1);
        assert_eq!(signal.after(), 1);
        assert_eq!(signal.ticket(), 1);
    }

    #[test]
    fn test_empty_signal_resolves_immediately() {
        let ctx = context();
        let signal = ctx.signal_since(ctx.last_ticket());
        ctx.wait(&signal).unwrap();
    }

    #[test]
    fn test_drop_drains_queue() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ctx = context();
            for _ in 0..8 {
                let ran = Arc::clone(&ran);
                ctx.submit(
                    Stage::Propagation,
                    Box::new(move |_| {
                        std::thread::sleep(Duration::from_millis(2));
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
            }
        }
        assert_eq!(ran.load(Ordering::SeqCst), 8);
    }
}
