//! Concurrent fetch pipeline
//!
//! Retrieves batches of remote messages through a bounded pool of worker
//! threads. Results always come back in input order; a failed item leaves an
//! empty slot instead of failing the batch.

pub mod cache;
pub mod cancel;
pub mod pipeline;
pub mod service;

pub use cache::SummaryFetcher;
pub use cancel::CancelToken;
pub use pipeline::{DEFAULT_WORKERS, FetchBatch, FetchPipeline, ItemFailure, MAX_WORKERS};
pub use service::{FetchError, MailService, Message, MessageMetadata};

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use super::*;

    /// In-memory mailbox with per-message latency and failure injection
    #[derive(Default)]
    pub struct MockMailService {
        pub delays: HashMap<String, Duration>,
        pub missing: HashSet<String>,
        pub broken: HashSet<String>,
        pub panics: HashSet<String>,
        /// Echo ids back lowercased, like a service with canonical ids
        pub lowercase: bool,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub fetched: Mutex<Vec<String>>,
    }

    impl MockMailService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn delay(mut self, id: &str, millis: u64) -> Self {
            self.delays.insert(id.to_string(), Duration::from_millis(millis));
            self
        }

        pub fn missing(mut self, id: &str) -> Self {
            self.missing.insert(id.to_string());
            self
        }

        pub fn broken(mut self, id: &str) -> Self {
            self.broken.insert(id.to_string());
            self
        }

        pub fn panics(mut self, id: &str) -> Self {
            self.panics.insert(id.to_string());
            self
        }

        pub fn lowercase_ids(mut self) -> Self {
            self.lowercase = true;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn message(id: &str) -> Message {
            Message {
                id: id.to_string(),
                thread_id: format!("thread-{}", id),
                subject: format!("Subject {}", id),
                from: "sender@example.com".to_string(),
                to: vec!["me@example.com".to_string()],
                date: 1_700_000_000,
                snippet: format!("snippet {}", id),
                body: format!("body of {}", id),
                labels: vec!["INBOX".to_string()],
            }
        }

        fn serve(&self, id: &str, cancel: &CancelToken) -> Result<Message, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let outcome = self.respond(id, cancel);

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if outcome.is_ok() {
                self.fetched.lock().unwrap().push(id.to_string());
            }
            outcome
        }

        fn respond(&self, id: &str, cancel: &CancelToken) -> Result<Message, FetchError> {
            if let Some(delay) = self.delays.get(id) {
                // Sleep in slices so cancellation is observed mid-request
                let step = Duration::from_millis(2);
                let mut waited = Duration::ZERO;
                while waited < *delay {
                    if cancel.is_cancelled() {
                        return Err(FetchError::Cancelled);
                    }
                    std::thread::sleep(step);
                    waited += step;
                }
            }
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if self.missing.contains(id) {
                return Err(FetchError::NotFound(id.to_string()));
            }
            if self.broken.contains(id) {
                return Err(FetchError::Transport(format!("connection reset fetching {}", id)));
            }
            if self.panics.contains(id) {
                panic!("decoder blew up on {}", id);
            }
            if self.lowercase {
                return Ok(Self::message(&id.to_lowercase()));
            }
            Ok(Self::message(id))
        }
    }

    impl MailService for MockMailService {
        fn fetch_message(&self, id: &str, cancel: &CancelToken) -> Result<Message, FetchError> {
            self.serve(id, cancel)
        }

        fn fetch_metadata(&self, id: &str, cancel: &CancelToken) -> Result<MessageMetadata, FetchError> {
            self.serve(id, cancel).map(|m| MessageMetadata::from(&m))
        }

        fn list_message_ids(&self, _query: &str, limit: usize, cancel: &CancelToken) -> Result<Vec<String>, FetchError> {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let mut ids: Vec<String> = self.delays.keys().cloned().collect();
            ids.sort();
            ids.truncate(limit);
            Ok(ids)
        }
    }

    pub fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }
}
