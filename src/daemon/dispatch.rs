use crate::core::diff::changed_keys;
use crate::core::models::{Account, ChangeSet, CleanSnapshot};
use anyhow::Result;
use async_trait::async_trait;

/// Receives every successful poll. Notification modules hang off this.
#[async_trait]
pub trait ModuleDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        account: &Account,
        snapshot: &CleanSnapshot,
        changes: &ChangeSet,
    ) -> Result<()>;
}

pub struct LogDispatcher;

#[async_trait]
impl ModuleDispatcher for LogDispatcher {
    async fn dispatch(
        &self,
        account: &Account,
        _snapshot: &CleanSnapshot,
        changes: &ChangeSet,
    ) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        tracing::info!(
            account = %account.id,
            fields = ?changed_keys(changes),
            "Account data changed"
        );

        for (key, new) in &changes.new {
            let old = changes.old.get(key);
            tracing::debug!(account = %account.id, field = %key, ?old, %new, "Field changed");
        }

        Ok(())
    }
}
