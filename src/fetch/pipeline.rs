use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use crossbeam::channel;
use tracing::{debug, warn};
use crate::{Error, Result};
use super::{CancelToken, FetchError, MailService, Message, MessageMetadata};

/// Workers used when the caller does not ask for a specific number
pub const DEFAULT_WORKERS: usize = 10;
/// Upper bound on concurrent outbound requests per batch
pub const MAX_WORKERS: usize = 20;

/// One item that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub id: String,
    pub error: FetchError,
}

/// Result of a batch: one slot per input id, in input order
#[derive(Debug)]
pub struct FetchBatch<T> {
    pub items: Vec<Option<T>>,
    pub failures: Vec<ItemFailure>,
}

impl<T> FetchBatch<T> {
    fn empty() -> Self {
        Self { items: Vec::new(), failures: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn fetched(&self) -> usize {
        self.items.iter().filter(|item| item.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_items(self) -> Vec<Option<T>> {
        self.items
    }
}

/// Bounded fan-out over a [`MailService`].
///
/// Each call spins up its own scoped worker pool; nothing outlives the call.
#[derive(Clone)]
pub struct FetchPipeline {
    service: Option<Arc<dyn MailService>>,
    workers: usize,
}

impl std::fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("bound", &self.service.is_some())
            .field("workers", &self.workers)
            .finish()
    }
}

impl FetchPipeline {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self {
            service: Some(service),
            workers: DEFAULT_WORKERS,
        }
    }

    /// A pipeline with no backing service; every batch fails with `NotInitialized`
    pub fn unbound() -> Self {
        Self {
            service: None,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Requested pool size, normalised by [`effective_workers`](Self::effective_workers)
    pub fn with_workers(mut self, requested: usize) -> Self {
        self.workers = Self::effective_workers(requested);
        self
    }

    /// Zero falls back to the default; anything above the cap is clamped
    pub fn effective_workers(requested: usize) -> usize {
        if requested == 0 {
            return DEFAULT_WORKERS;
        }
        requested.min(MAX_WORKERS)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_bound(&self) -> bool {
        self.service.is_some()
    }

    /// Full messages for `ids`, `None` where a fetch failed
    pub fn fetch_messages(&self, ids: &[String], cancel: &CancelToken) -> Result<Vec<Option<Message>>> {
        let batch = self.run(ids, cancel, |service, id, cancel| service.fetch_message(id, cancel))?;
        Ok(batch.into_items())
    }

    /// Headers only for `ids`, `None` where a fetch failed
    pub fn fetch_metadata(&self, ids: &[String], cancel: &CancelToken) -> Result<Vec<Option<MessageMetadata>>> {
        let batch = self.run(ids, cancel, |service, id, cancel| service.fetch_metadata(id, cancel))?;
        Ok(batch.into_items())
    }

    /// Identifiers matching `query`
    pub fn list_ids(&self, query: &str, limit: usize, cancel: &CancelToken) -> Result<Vec<String>> {
        let service = self.service.as_deref().ok_or(Error::NotInitialized)?;
        cancel.check()?;
        Ok(service.list_message_ids(query, limit, cancel)?)
    }

    /// Run `fetch` for every id on the worker pool.
    ///
    /// Workers pull `(index, id)` pairs from a shared queue and report
    /// `(index, outcome)` back, so slot `i` always belongs to `ids[i]` no
    /// matter which request finishes first. Per-item errors, including a
    /// panicking service call, end up in [`FetchBatch::failures`]; only a
    /// missing service or a cancellation that cut work short fails the whole
    /// call.
    pub fn run<T, F>(&self, ids: &[String], cancel: &CancelToken, fetch: F) -> Result<FetchBatch<T>>
    where
        T: Send,
        F: Fn(&dyn MailService, &str, &CancelToken) -> std::result::Result<T, FetchError> + Sync,
    {
        let service = self.service.as_deref().ok_or(Error::NotInitialized)?;
        if ids.is_empty() {
            return Ok(FetchBatch::empty());
        }
        cancel.check()?;

        let workers = self.workers.min(ids.len());
        debug!("Fetching {} items with {} workers", ids.len(), workers);

        let (job_tx, job_rx) = channel::unbounded::<(usize, &str)>();
        let (result_tx, result_rx) = channel::unbounded::<(usize, std::result::Result<T, FetchError>)>();
        for (index, id) in ids.iter().enumerate() {
            // Receiver is alive in this scope, so send cannot fail
            let _ = job_tx.send((index, id.as_str()));
        }
        drop(job_tx);

        let mut items: Vec<Option<T>> = (0..ids.len()).map(|_| None).collect();
        let mut failures = Vec::new();

        let fetch = &fetch;
        crossbeam::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move |_| {
                    for (index, id) in job_rx.iter() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        // A panicking service call only costs its own slot
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| fetch(service, id, cancel)))
                            .unwrap_or_else(|payload| {
                                Err(FetchError::Transport(format!(
                                    "fetch of {} panicked: {}",
                                    id,
                                    panic_message(payload.as_ref())
                                )))
                            });
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (index, outcome) in result_rx.iter() {
                match outcome {
                    Ok(item) => items[index] = Some(item),
                    Err(error) => {
                        debug!("Fetch of {} failed: {}", ids[index], error);
                        failures.push(ItemFailure {
                            index,
                            id: ids[index].clone(),
                            error,
                        });
                    }
                }
            }
        })
        .map_err(|_| Error::Fetch("fetch worker panicked".to_string()))?;

        // A deadline that lapses after the last item finished does not void a
        // complete batch; only skipped or aborted items do.
        let skipped = ids.len() - items.iter().flatten().count() - failures.len();
        let aborted = failures.iter().any(|f| f.error == FetchError::Cancelled);
        if (skipped > 0 || aborted) && cancel.is_cancelled() {
            debug!("Fetch batch cancelled after {} of {} items", items.iter().flatten().count(), ids.len());
            return Err(Error::Cancelled);
        }

        failures.sort_by_key(|f| f.index);
        if failures.len() == ids.len() {
            warn!("All {} fetches in batch failed", ids.len());
        } else if !failures.is_empty() {
            debug!("Fetched {} of {} items", ids.len() - failures.len(), ids.len());
        }

        Ok(FetchBatch { items, failures })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
