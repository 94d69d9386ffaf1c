use crate::core::models::{Account, CleanSnapshot, StoredSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list_polling_accounts(&self) -> Result<Vec<Account>>;
    async fn read_snapshot(&self, account_id: &str) -> Result<Option<CleanSnapshot>>;
    async fn write_snapshot(
        &self,
        account_id: &str,
        snapshot: &CleanSnapshot,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreInner {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    snapshots: HashMap<String, StoredSnapshot>,
}

/// Accounts and their last snapshot, held in memory and, when a path is
/// set, rewritten to a JSON file after every snapshot write.
#[derive(Clone, Default)]
pub struct JsonStore {
    inner: Arc<RwLock<StoreInner>>,
    path: Option<PathBuf>,
}

impl JsonStore {
    pub fn in_memory(accounts: Vec<Account>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                accounts,
                snapshots: HashMap::new(),
            })),
            path: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let inner = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read store: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse store: {}", path.display()))?
        } else {
            tracing::info!(?path, "Store file not found, starting empty");
            StoreInner::default()
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.inner.read().await.accounts.clone()
    }

    pub async fn stored_snapshot(&self, account_id: &str) -> Option<StoredSnapshot> {
        self.inner.read().await.snapshots.get(account_id).cloned()
    }

    /// Replaces the in-memory state with the file's, so accounts added or
    /// edited while the daemon runs are picked up. Memory only ever holds
    /// what was last read from or written to the file.
    async fn reload(&self, inner: &mut StoreInner) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read store: {}", path.display()))?;
        *inner = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse store: {}", path.display()))?;
        Ok(())
    }

    async fn save(&self, inner: &StoreInner) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(inner)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write store: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace store: {}", path.display()))?;

        tracing::debug!(?path, "Saved store");
        Ok(())
    }
}

#[async_trait]
impl AccountStore for JsonStore {
    async fn list_polling_accounts(&self) -> Result<Vec<Account>> {
        let mut inner = self.inner.write().await;
        self.reload(&mut inner).await?;

        Ok(inner.accounts.iter().filter(|a| a.polling).cloned().collect())
    }

    async fn read_snapshot(&self, account_id: &str) -> Result<Option<CleanSnapshot>> {
        Ok(self
            .inner
            .read()
            .await
            .snapshots
            .get(account_id)
            .map(|s| s.data.clone()))
    }

    async fn write_snapshot(
        &self,
        account_id: &str,
        snapshot: &CleanSnapshot,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        self.reload(&mut inner).await?;

        let mut next = inner.clone();
        if let Some(account) = next.accounts.iter_mut().find(|a| a.id == account_id) {
            account.last_login = snapshot.get_i64("lastLogin");
            account.last_logout = snapshot.get_i64("lastLogout");
        }
        next.snapshots.insert(
            account_id.to_string(),
            StoredSnapshot {
                updated_at: at,
                data: snapshot.clone(),
            },
        );

        self.save(&next).await?;
        *inner = next;
        Ok(())
    }
}
