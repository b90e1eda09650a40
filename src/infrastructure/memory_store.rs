use super::{KeyValueStore, RepoResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Mutexed map implementing the full store contract. Suitable for tests and
/// single-process deployments; a networked cache takes its place when
/// decisions must be shared across processes.
pub struct InMemoryKeyValueStore {
    pub entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> RepoResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn multi_get(&self, keys: &[String]) -> RepoResult<Vec<Option<String>>> {
        let entries = self.entries.lock().unwrap();
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> RepoResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &str) -> RepoResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            Ok(false)
        } else {
            entries.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> RepoResult<()> {
        let mut entries = self.entries.lock().unwrap();
        for (key, value) in pairs {
            entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> RepoResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_matching(&self, key_prefix: &str) -> RepoResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(key_prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn flush_all(&self) -> RepoResult<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = InMemoryKeyValueStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_not_exists_never_overwrites() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.set_if_not_exists("k", "first").await.unwrap());
        assert!(!store.set_if_not_exists("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_multi_get_preserves_key_order() {
        let store = InMemoryKeyValueStore::new();
        store.set("a", "1").await.unwrap();
        store.set("c", "3").await.unwrap();
        let values = store
            .multi_get(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delete_matching_removes_prefix() {
        let store = InMemoryKeyValueStore::new();
        store.set("zone-1:a", "1").await.unwrap();
        store.set("zone-1:b", "2").await.unwrap();
        store.set("zone-2:a", "3").await.unwrap();
        let removed = store.delete_matching("zone-1:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_all_empties_store() {
        let store = InMemoryKeyValueStore::new();
        store.set("a", "1").await.unwrap();
        store.multi_set(&[("b".to_string(), "2".to_string())]).await.unwrap();
        store.flush_all().await.unwrap();
        assert!(store.is_empty());
    }
}
