//! Process-local sharing of subscriptions
//!
//! Spouts configured with `shared_consumer` obtain their source from a
//! [`SharedSources`] registry instead of subscribing on their own. The
//! registry keys sources by [`Subscription`], counts references, and only
//! closes a source when the last spout using it releases it.

use crate::error::SourceError;
use crate::source::{MessageSource, SourceConnector, Subscription};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

static GLOBAL: OnceLock<Arc<SharedSources>> = OnceLock::new();

struct SharedEntry {
    source: Arc<dyn MessageSource>,
    refs: usize,
}

/// Reference-counted registry of shared subscriptions
#[derive(Default)]
pub struct SharedSources {
    entries: Mutex<HashMap<Subscription, SharedEntry>>,
}

impl SharedSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<SharedSources> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SharedSources::new())))
    }

    /// Get the shared source for `subscription`, subscribing on first use
    pub async fn acquire(
        &self,
        subscription: &Subscription,
        connector: &dyn SourceConnector,
    ) -> Result<Arc<dyn MessageSource>, SourceError> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(subscription) {
            entry.refs += 1;
            debug!(%subscription, refs = entry.refs, "Reusing shared source");
            return Ok(Arc::clone(&entry.source));
        }

        let source = connector.subscribe(subscription).await?;
        info!(%subscription, source = source.name(), "Created shared source");
        entries.insert(
            subscription.clone(),
            SharedEntry {
                source: Arc::clone(&source),
                refs: 1,
            },
        );
        Ok(source)
    }

    /// Drop one reference; closes the source when none remain
    ///
    /// Returns whether the source was closed. Releasing an unknown
    /// subscription is a no-op.
    pub async fn release(&self, subscription: &Subscription) -> Result<bool, SourceError> {
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(subscription) else {
            return Ok(false);
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            debug!(%subscription, refs = entry.refs, "Released shared source");
            return Ok(false);
        }

        if let Some(entry) = entries.remove(subscription) {
            info!(%subscription, "Closing shared source");
            entry.source.close().await?;
        }
        Ok(true)
    }

    /// References currently held on `subscription`
    pub async fn refs(&self, subscription: &Subscription) -> usize {
        self.entries
            .lock()
            .await
            .get(subscription)
            .map_or(0, |entry| entry.refs)
    }
}
