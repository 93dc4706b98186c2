use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use crate::Result;
use crate::repo::{SummaryRepo, require};
use crate::storage::Store;
use super::{CancelToken, FetchPipeline, Message};

/// Cache-through summaries for one account.
///
/// Hits come from the summary cache; misses are fetched through the pipeline,
/// summarised by the caller and written back before being returned.
pub struct SummaryFetcher<'a> {
    pipeline: &'a FetchPipeline,
    summaries: SummaryRepo,
    account: String,
}

impl<'a> SummaryFetcher<'a> {
    pub fn new(pipeline: &'a FetchPipeline, store: &Store, account: &str) -> Result<Self> {
        require("account", account)?;
        Ok(Self {
            pipeline,
            summaries: store.summaries(),
            account: account.to_string(),
        })
    }

    /// Summaries for `ids` in input order; `None` where neither the cache nor
    /// the remote service could produce one.
    pub fn summaries<F>(&self, ids: &[String], cancel: &CancelToken, summarize: F) -> Result<Vec<Option<String>>>
    where
        F: Fn(&Message) -> Option<String>,
    {
        let mut known: HashMap<String, String> = self
            .summaries
            .load_many(&self.account, ids)?
            .into_iter()
            .map(|(id, entry)| (id, entry.text))
            .collect();

        let mut seen = HashSet::new();
        let misses: Vec<String> = ids
            .iter()
            .filter(|id| !id.trim().is_empty() && !known.contains_key(id.as_str()))
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        debug!(
            "Summary cache for {}: {} hits, {} misses",
            self.account,
            known.len(),
            misses.len()
        );

        if misses.is_empty() {
            return Ok(ids.iter().map(|id| known.get(id).cloned()).collect());
        }

        // Slots line up with `misses`; key by the requested id, not whatever
        // form of it the service echoes back.
        let fetched = self.pipeline.fetch_messages(&misses, cancel)?;
        for (id, message) in misses.iter().zip(fetched) {
            let Some(message) = message else {
                continue;
            };
            let Some(text) = summarize(&message).filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            if let Err(e) = self.summaries.save(&self.account, id, &text) {
                warn!("Failed to cache summary for {}: {}", id, e);
            }
            known.insert(id.clone(), text);
        }

        Ok(ids.iter().map(|id| known.get(id).cloned()).collect())
    }
}
