use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::storage::{Collection, Storage};

/// テスト用のモックStorage実装
///
/// Cloneしたハンドルは同じデータを共有するので、
/// フォアグラウンドとバックグラウンドで同じストアを開いた状態や再起動を再現できる。
#[derive(Clone, Default)]
pub struct MockStorage {
    collections: Arc<Mutex<HashMap<Collection, BTreeMap<String, String>>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// コレクション内の件数
    pub fn count(&self, collection: Collection) -> usize {
        let collections = self.collections.lock().unwrap();
        collections.get(&collection).map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait(?Send)]
impl Storage for MockStorage {
    async fn put(&self, collection: Collection, key: &str, json: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection)
            .or_default()
            .insert(key.to_string(), json.to_string());
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(&collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(&collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(c) = collections.get_mut(&collection) {
            c.remove(key);
        }
        Ok(())
    }
}
