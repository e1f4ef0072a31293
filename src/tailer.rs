//! Operation log tailer.
//!
//! The tailer owns one live cursor at a time on a background thread and
//! forwards every entry into a bounded channel. When the cursor ends or a read
//! fails, it fetches the current tail again and opens a fresh cursor from
//! there, backing off between consecutive failures. Consumers see one
//! continuous stream; entries written during the reconnect gap may be missed.
//!
//! A cold start never replays history: the first cursor starts after the tail
//! observed when `start` is called.

use crate::config::TailerConfig;
use crate::error::{FeedError, Result};
use crate::retry::RetryPolicy;
use crate::source::{CursorRead, LogCursor, LogSource};
use crate::types::{LogEntry, Position};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Signals capacity; signals are dropped when nobody drains them.
const SIGNAL_CAPACITY: usize = 64;

/// Out-of-band notifications from the tailer.
#[derive(Clone, Debug)]
pub enum TailerSignal {
    /// The cursor was lost and the tailer is reconnecting.
    Reconnecting { attempt: u32, error: FeedError },
    /// The retry budget is spent; the entry stream has ended.
    Failed(FeedError),
}

/// Counters snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TailerStats {
    pub entries: u64,
    pub cursors_opened: u64,
    pub reconnects: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    entries: AtomicU64,
    cursors_opened: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
}

struct Running {
    /// Dropped to request shutdown.
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

/// Tails an operation log and streams its entries.
pub struct OplogTailer {
    source: Arc<dyn LogSource>,
    config: TailerConfig,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    signal_tx: Sender<TailerSignal>,
    signal_rx: Receiver<TailerSignal>,
    running: Mutex<Option<Running>>,
}

impl OplogTailer {
    pub fn new(source: Arc<dyn LogSource>, config: TailerConfig) -> Self {
        let policy = RetryPolicy::from(&config.retry);
        let (signal_tx, signal_rx) = bounded(SIGNAL_CAPACITY);
        Self {
            source,
            config,
            policy,
            counters: Arc::new(Counters::default()),
            signal_tx,
            signal_rx,
            running: Mutex::new(None),
        }
    }

    /// Start tailing. Returns the entry stream, which ends when the tailer is
    /// stopped or gives up.
    pub fn start(&self) -> Result<Receiver<LogEntry>> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(FeedError::AlreadyStarted);
        }

        let namespace = self.config.namespace.clone();
        let initial = match self.source.current_position(namespace.as_deref()) {
            Ok(position) => Some(position),
            Err(e) => {
                tracing::warn!(error = %e, "could not read oplog tail at start, will retry");
                None
            }
        };

        let (entry_tx, entry_rx) = bounded(self.config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        let worker = Worker {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            policy: self.policy.clone(),
            counters: Arc::clone(&self.counters),
            signals: self.signal_tx.clone(),
            entries: entry_tx,
            shutdown: shutdown_rx,
        };

        let thread = thread::Builder::new()
            .name("oplog-tailer".into())
            .spawn(move || worker.run(initial))
            .map_err(|e| FeedError::TransientIo(format!("spawn tailer thread: {}", e)))?;

        tracing::info!(namespace = ?namespace, tail = ?initial, "oplog tailer started");
        *running = Some(Running {
            shutdown: shutdown_tx,
            thread,
        });

        Ok(entry_rx)
    }

    /// Stop tailing. Cancels any pending reconnect wait, releases the cursor
    /// and waits for the background thread to exit. Idempotent.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        drop(running.shutdown);
        if running.thread.join().is_err() {
            tracing::error!("oplog tailer thread panicked");
        }
        tracing::info!("oplog tailer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map_or(false, |r| !r.thread.is_finished())
    }

    /// Receiver for out-of-band signals (reconnects, terminal failure).
    pub fn signals(&self) -> Receiver<TailerSignal> {
        self.signal_rx.clone()
    }

    pub fn stats(&self) -> TailerStats {
        TailerStats {
            entries: self.counters.entries.load(Ordering::Relaxed),
            cursors_opened: self.counters.cursors_opened.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for OplogTailer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the background thread.
struct Worker {
    source: Arc<dyn LogSource>,
    config: TailerConfig,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    signals: Sender<TailerSignal>,
    entries: Sender<LogEntry>,
    shutdown: Receiver<()>,
}

/// Why a cursor session ended.
enum SessionEnd {
    /// Shutdown requested or the consumer went away.
    Stop,
    /// Cursor lost; reconnect.
    Lost(FeedError),
}

impl Worker {
    fn run(self, initial: Option<Position>) {
        let namespace = self.config.namespace.clone();
        let mut resume = initial;
        let mut last_known: Option<Position> = None;
        let mut failures: u32 = 0;
        let mut last_error: Option<FeedError> = None;

        loop {
            if failures > 0 {
                if !self.policy.should_retry(failures) {
                    let error = FeedError::RetriesExhausted {
                        attempts: failures,
                        last_error: last_error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_default(),
                    };
                    tracing::error!(error = %error, "oplog tailer giving up");
                    let _ = self.signals.try_send(TailerSignal::Failed(error));
                    return;
                }
                if !self.wait(self.policy.delay_for_attempt(failures)) {
                    return;
                }
            }

            let tail = match resume.take() {
                Some(position) => Ok(position),
                None => self.source.current_position(namespace.as_deref()),
            };
            let cursor = tail.and_then(|tail| {
                let after = last_known.map_or(tail, |last| tail.max(last));
                self.source
                    .open_cursor(after, namespace.as_deref())
                    .map(|cursor| (after, cursor))
            });

            let (after, mut cursor) = match cursor {
                Ok(opened) => opened,
                Err(e) => {
                    failures += 1;
                    self.record_failure(failures, e, &mut last_error);
                    continue;
                }
            };

            self.counters.cursors_opened.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(position = %after, "opened oplog cursor");

            let end = self.session(cursor.as_mut(), &mut last_known);
            drop(cursor);

            match end {
                SessionEnd::Stop => return,
                SessionEnd::Lost(e) => {
                    // The cursor opened, so earlier tail/open failures no longer count.
                    failures = 1;
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.record_failure(failures, e, &mut last_error);
                }
            }
        }
    }

    /// Read from one cursor until it is lost or the tailer stops.
    fn session(
        &self,
        cursor: &mut dyn LogCursor,
        last_known: &mut Option<Position>,
    ) -> SessionEnd {
        let wait = self.config.read_wait();

        loop {
            if self.stopped() {
                return SessionEnd::Stop;
            }

            let entry = match cursor.next_entry(wait) {
                Ok(CursorRead::Entry(entry)) => entry,
                Ok(CursorRead::Idle) => continue,
                Ok(CursorRead::Exhausted) => {
                    return SessionEnd::Lost(FeedError::TransientIo("cursor exhausted".into()))
                }
                Err(e) => return SessionEnd::Lost(e),
            };

            if last_known.map_or(false, |last| entry.position <= last) {
                tracing::debug!(position = %entry.position, "skipping already delivered entry");
                continue;
            }
            let position = entry.position;

            select! {
                send(self.entries, entry) -> sent => {
                    if sent.is_err() {
                        tracing::debug!("oplog consumer went away");
                        return SessionEnd::Stop;
                    }
                }
                recv(self.shutdown) -> _ => return SessionEnd::Stop,
            }

            *last_known = Some(position);
            self.counters.entries.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_failure(&self, attempt: u32, error: FeedError, last_error: &mut Option<FeedError>) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(attempt, error = %error, "oplog cursor lost, reconnecting");
        let _ = self.signals.try_send(TailerSignal::Reconnecting {
            attempt,
            error: error.clone(),
        });
        *last_error = Some(error);
    }

    /// Sleep for `delay` unless shutdown is requested first. Returns false on shutdown.
    fn wait(&self, delay: Duration) -> bool {
        match self.shutdown.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) | Ok(()) => false,
        }
    }

    fn stopped(&self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }
}
