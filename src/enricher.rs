//! Update enrichment.
//!
//! Update entries only carry a change delta. The enricher looks up the current
//! document for every update and attaches it, so subscription filters can be
//! evaluated against the whole document. Other entries pass through as-is.
//!
//! With [`EnrichOrdering::Concurrent`] lookups run on a worker pool and
//! complete in any order relative to each other. An insert or delete waits for
//! every in-flight lookup before it is forwarded, so it never overtakes an
//! earlier update and is never overtaken by a later one.
//! [`EnrichOrdering::Serial`] looks up inline and keeps strict log order.
//!
//! A failed lookup is logged and counted; the entry is forwarded without a
//! current document.

use crate::config::{EnrichOrdering, EnricherConfig};
use crate::error::{FeedError, Result};
use crate::source::DocumentStore;
use crate::types::{EnrichedEntry, LogEntry, OpKind};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Counters snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnricherStats {
    pub passed_through: u64,
    pub lookups: u64,
    pub lookup_failures: u64,
}

#[derive(Default)]
struct Counters {
    passed_through: AtomicU64,
    lookups: AtomicU64,
    lookup_failures: AtomicU64,
}

/// Joins update entries with their current document.
#[derive(Clone)]
pub struct DetailEnricher {
    store: Arc<dyn DocumentStore>,
    config: EnricherConfig,
    counters: Arc<Counters>,
}

/// Threads spawned by [`DetailEnricher::spawn`]. They exit on their own once
/// the input stream ends.
pub struct EnricherTask {
    coordinator: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl EnricherTask {
    /// Wait for all enricher threads to exit.
    pub fn join(self) {
        if self.coordinator.join().is_err() {
            tracing::error!("enricher coordinator panicked");
        }
        for worker in self.workers {
            if worker.join().is_err() {
                tracing::error!("enricher worker panicked");
            }
        }
    }
}

impl DetailEnricher {
    pub fn new(store: Arc<dyn DocumentStore>, config: EnricherConfig) -> Self {
        Self {
            store,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enrich one entry on the calling thread. Non-update entries pass through.
    pub fn enrich(&self, entry: LogEntry) -> EnrichedEntry {
        if entry.op != OpKind::Update {
            self.counters.passed_through.fetch_add(1, Ordering::Relaxed);
            return EnrichedEntry::passthrough(entry);
        }

        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        let current = match self.store.read_one(&entry.namespace, &entry.document_id) {
            Ok(Some(document)) => Some(document),
            Ok(None) => {
                self.report_failure(&entry, "not found");
                None
            }
            Err(e) => {
                self.report_failure(&entry, &e.to_string());
                None
            }
        };

        EnrichedEntry::enriched(entry, current)
    }

    /// Consume `input` on background threads and return the enriched stream.
    /// The output ends after the input ends and in-flight lookups complete.
    pub fn spawn(&self, input: Receiver<LogEntry>) -> Result<(Receiver<EnrichedEntry>, EnricherTask)> {
        let (output_tx, output_rx) = bounded(self.config.channel_capacity);

        let task = match self.config.ordering {
            EnrichOrdering::Serial => {
                let enricher = self.clone();
                let coordinator = spawn_named("enricher", move || {
                    for entry in input.iter() {
                        if output_tx.send(enricher.enrich(entry)).is_err() {
                            break;
                        }
                    }
                })?;
                EnricherTask {
                    coordinator,
                    workers: Vec::new(),
                }
            }
            EnrichOrdering::Concurrent => self.spawn_concurrent(input, output_tx)?,
        };

        Ok((output_rx, task))
    }

    fn spawn_concurrent(
        &self,
        input: Receiver<LogEntry>,
        output: Sender<EnrichedEntry>,
    ) -> Result<EnricherTask> {
        let (job_tx, job_rx) = unbounded::<LogEntry>();
        let (done_tx, done_rx) = unbounded::<EnrichedEntry>();

        let mut workers = Vec::with_capacity(self.config.workers);
        for i in 0..self.config.workers {
            let enricher = self.clone();
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            workers.push(spawn_named(&format!("enricher-worker-{}", i), move || {
                for entry in jobs.iter() {
                    if done.send(enricher.enrich(entry)).is_err() {
                        break;
                    }
                }
            })?);
        }
        drop(done_tx);

        let enricher = self.clone();
        let coordinator = spawn_named("enricher", move || {
            enricher.coordinate(input, job_tx, done_rx, output);
        })?;

        Ok(EnricherTask {
            coordinator,
            workers,
        })
    }

    /// Dispatch updates to the pool, forward completions, hold non-updates
    /// until the pool is drained.
    fn coordinate(
        &self,
        input: Receiver<LogEntry>,
        jobs: Sender<LogEntry>,
        done: Receiver<EnrichedEntry>,
        output: Sender<EnrichedEntry>,
    ) {
        let mut in_flight = 0usize;

        let drain = |in_flight: &mut usize| -> bool {
            while *in_flight > 0 {
                match done.recv() {
                    Ok(enriched) => {
                        *in_flight -= 1;
                        if output.send(enriched).is_err() {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }
            true
        };

        loop {
            select! {
                recv(input) -> msg => match msg {
                    Ok(entry) if entry.op == OpKind::Update => {
                        if jobs.send(entry).is_err() {
                            return;
                        }
                        in_flight += 1;
                    }
                    Ok(entry) => {
                        if !drain(&mut in_flight) {
                            return;
                        }
                        if output.send(self.enrich(entry)).is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        drain(&mut in_flight);
                        return;
                    }
                },
                recv(done) -> msg => match msg {
                    Ok(enriched) => {
                        in_flight -= 1;
                        if output.send(enriched).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                },
            }
        }
    }

    fn report_failure(&self, entry: &LogEntry, reason: &str) {
        self.counters.lookup_failures.fetch_add(1, Ordering::Relaxed);
        let error = FeedError::LookupFailure {
            namespace: entry.namespace.to_string(),
            id: entry.document_id.to_string(),
            reason: reason.to_string(),
        };
        tracing::warn!(position = %entry.position, error = %error, "forwarding update without current document");
    }

    pub fn stats(&self) -> EnricherStats {
        EnricherStats {
            passed_through: self.counters.passed_through.load(Ordering::Relaxed),
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            lookup_failures: self.counters.lookup_failures.load(Ordering::Relaxed),
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| FeedError::TransientIo(format!("spawn {} thread: {}", name, e)))
}
