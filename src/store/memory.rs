use crate::store::creds::Creds;
use crate::store::error::Result;
use crate::store::traits::{Backend, WriteOp, CATEGORY_CREDS, CREDS_RECORD_ID};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory backend for bootstrapping and tests. Batch writes are atomic by
/// construction: the whole map is updated under one lock. Credentials live in
/// the same map (under `creds/self`) so batches that touch both pre-keys and
/// counters stay atomic.
#[derive(Default)]
pub struct MemoryStore {
    categories: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryStore {
    async fn get(&self, category: &str, ids: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let categories = self.categories.lock().unwrap();
        let mut out = HashMap::new();
        if let Some(records) = categories.get(category) {
            for id in ids {
                if let Some(value) = records.get(id) {
                    out.insert(id.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }

    async fn set(&self, category: &str, entries: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        let mut categories = self.categories.lock().unwrap();
        let records = categories.entry(category.to_string()).or_default();
        for (id, value) in entries {
            match value {
                Some(value) => {
                    records.insert(id, value);
                }
                None => {
                    records.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn set_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut categories = self.categories.lock().unwrap();
        for op in ops {
            let records = categories.entry(op.category).or_default();
            match op.value {
                Some(value) => {
                    records.insert(op.id, value);
                }
                None => {
                    records.remove(&op.id);
                }
            }
        }
        Ok(())
    }

    async fn load_creds(&self) -> Result<Option<Creds>> {
        let categories = self.categories.lock().unwrap();
        match categories
            .get(CATEGORY_CREDS)
            .and_then(|records| records.get(CREDS_RECORD_ID))
        {
            Some(blob) => Ok(Some(serde_json::from_slice(blob)?)),
            None => Ok(None),
        }
    }

    async fn save_creds(&self, creds: &Creds) -> Result<()> {
        let blob = serde_json::to_vec(creds)?;
        self.categories
            .lock()
            .unwrap()
            .entry(CATEGORY_CREDS.to_string())
            .or_default()
            .insert(CREDS_RECORD_ID.to_string(), blob);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::CATEGORY_PRE_KEY;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let store = MemoryStore::new();
        store
            .set(
                CATEGORY_PRE_KEY,
                vec![("1".to_string(), Some(vec![1, 2, 3]))],
            )
            .await
            .unwrap();

        let found = store
            .get(CATEGORY_PRE_KEY, &["1".to_string(), "2".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["1"], vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_via_none() {
        let store = MemoryStore::new();
        store
            .set(CATEGORY_PRE_KEY, vec![("1".to_string(), Some(vec![9]))])
            .await
            .unwrap();
        store
            .set(CATEGORY_PRE_KEY, vec![("1".to_string(), None)])
            .await
            .unwrap();

        let found = store.get(CATEGORY_PRE_KEY, &["1".to_string()]).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_batch_spans_categories() {
        let store = MemoryStore::new();
        store
            .set_batch(vec![
                WriteOp::put(CATEGORY_PRE_KEY, "5", vec![5]),
                WriteOp::put("session", "peer", vec![7]),
            ])
            .await
            .unwrap();

        assert!(!store
            .get(CATEGORY_PRE_KEY, &["5".to_string()])
            .await
            .unwrap()
            .is_empty());
        assert!(!store
            .get("session", &["peer".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_creds_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load_creds().await.unwrap().is_none());

        let creds = Creds::generate();
        store.save_creds(&creds).await.unwrap();
        let loaded = store.load_creds().await.unwrap().unwrap();
        assert_eq!(loaded.registration_id, creds.registration_id);
    }
}
