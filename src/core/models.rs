use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub uuid: String,
    #[serde(default = "default_polling")]
    pub polling: bool,
    #[serde(default)]
    pub last_login: Option<i64>,
    #[serde(default)]
    pub last_logout: Option<i64>,
}

fn default_polling() -> bool {
    true
}

impl Account {
    pub fn new(id: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uuid: uuid.into(),
            polling: true,
            last_login: None,
            last_logout: None,
        }
    }

    /// The API only reports a session while the player is online, and a
    /// login newer than the last logout is the cheapest hint of that.
    pub fn appears_online(&self) -> bool {
        match (self.last_login, self.last_logout) {
            (Some(login), Some(logout)) => login > logout,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Flat map of scalar fields from one poll. Absent keys read as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CleanSnapshot(BTreeMap<String, Value>);

impl CleanSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> &Value {
        self.0.get(key).unwrap_or(&Value::Null)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).as_i64()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for CleanSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub new: BTreeMap<String, Value>,
    pub old: BTreeMap<String, Value>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub updated_at: DateTime<Utc>,
    pub data: CleanSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_appears_online() {
        let mut account = Account::new("a", "uuid");
        assert!(!account.appears_online());

        account.last_login = Some(2_000);
        assert!(account.appears_online());

        account.last_logout = Some(3_000);
        assert!(!account.appears_online());

        account.last_login = Some(4_000);
        assert!(account.appears_online());

        account.last_logout = Some(4_000);
        assert!(!account.appears_online());
    }

    #[test]
    fn test_snapshot_missing_key_reads_null() {
        let snapshot: CleanSnapshot = [("lastLogin", json!(5))].into_iter().collect();
        assert_eq!(snapshot.get_i64("lastLogin"), Some(5));
        assert_eq!(snapshot.get("version"), &Value::Null);
    }

    #[test]
    fn test_account_defaults_when_deserializing() {
        let account: Account = serde_json::from_str(r#"{"id":"1","uuid":"abc"}"#).unwrap();
        assert!(account.polling);
        assert_eq!(account.last_login, None);
    }
}
