use crate::store::creds::Creds;
use crate::store::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Storage category for one-time pre-keys; records live under
/// `pre-key/<id>`.
pub const CATEGORY_PRE_KEY: &str = "pre-key";

/// Category and record id of the single credentials blob. Kept addressable
/// through `set_batch` so counter moves land atomically with key records.
pub const CATEGORY_CREDS: &str = "creds";
pub const CREDS_RECORD_ID: &str = "self";

/// One keyed write inside an atomic batch. `None` deletes the record.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub category: String,
    pub id: String,
    pub value: Option<Vec<u8>>,
}

impl WriteOp {
    pub fn put(category: &str, id: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            category: category.to_string(),
            id: id.into(),
            value: Some(value),
        }
    }

    pub fn delete(category: &str, id: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            id: id.into(),
            value: None,
        }
    }
}

/// The persistence seam the core is parameterized by. The core never assumes
/// a backing medium; implementations decide layout and durability.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the requested ids of a category. Missing ids are simply absent
    /// from the returned map.
    async fn get(&self, category: &str, ids: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    /// Write (or delete, for `None`) entries of a single category.
    async fn set(&self, category: &str, entries: Vec<(String, Option<Vec<u8>>)>) -> Result<()>;

    /// Apply every write in the batch atomically: either all of them are
    /// visible afterwards or none are. Pre-key allocation depends on this.
    async fn set_batch(&self, ops: Vec<WriteOp>) -> Result<()>;

    async fn load_creds(&self) -> Result<Option<Creds>>;
    async fn save_creds(&self, creds: &Creds) -> Result<()>;
}
