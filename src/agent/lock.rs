//! The agent's busy flag, held for the duration of one build

use crate::core::state::AgentRecord;
use crate::persistence::{Store, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Marks an agent as building until released
///
/// Acquiring persists `building = Some(id)`. [`BusyGuard::release`] persists
/// `building = None`; a guard dropped without being released (its task was
/// cancelled, or it unwound) spawns the same write instead.
pub struct BusyGuard {
    store: Arc<dyn Store>,
    record: AgentRecord,
    released: bool,
}

impl BusyGuard {
    pub async fn acquire(
        store: Arc<dyn Store>,
        mut record: AgentRecord,
        build_id: &str,
    ) -> Result<Self, StoreError> {
        record.building = Some(build_id.to_string());
        store.update_agent(&record).await?;
        debug!(agent = %record.id, build = %build_id, "Agent locked");

        Ok(Self {
            store,
            record,
            released: false,
        })
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    /// Clear the busy flag and return the updated record
    pub async fn release(mut self) -> Result<AgentRecord, StoreError> {
        let mut record = self.record.clone();
        record.building = None;

        let result = self.store.update_agent(&record).await;
        self.released = true;
        result?;

        debug!(agent = %record.id, "Agent unlocked");
        Ok(record)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = self.store.clone();
        let mut record = self.record.clone();
        record.building = None;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.update_agent(&record).await {
                        warn!(agent = %record.id, "Failed to unlock agent: {}", e);
                    }
                });
            }
            Err(_) => warn!(agent = %record.id, "No runtime left to unlock agent"),
        }
    }
}
