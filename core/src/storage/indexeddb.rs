use async_trait::async_trait;
use rexie::*;
use serde::{Deserialize, Serialize};
use wasm_bindgen::JsValue;

use crate::error::{CoreError, Result};
use crate::storage::{Collection, Storage, UnavailableStorage};

const DB_NAME: &str = "storyshare_db";
const DB_VERSION: u32 = 3;

/// IndexedDBに置く行（主キー + JSON本体）
#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    id: String,
    body: String,
}

/// IndexedDB実装
///
/// ウィンドウとService Workerのどちらからでも同じDBを開ける。
pub struct IndexedDbStorage {
    db: Rexie,
}

impl IndexedDbStorage {
    /// DBを開く。IndexedDBが無い環境では `StorageUnavailable`
    pub async fn open() -> Result<Self> {
        let mut builder = Rexie::builder(DB_NAME).version(DB_VERSION);
        for collection in Collection::all() {
            builder = builder.add_object_store(ObjectStore::new(collection.store_name()).key_path("id"));
        }

        let db = builder
            .build()
            .await
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;

        log::info!("IndexedDB {} v{} opened", DB_NAME, DB_VERSION);
        Ok(Self { db })
    }

    fn decode_row(value: JsValue) -> Result<StoredRow> {
        Ok(serde_wasm_bindgen::from_value(value)?)
    }
}

#[async_trait(?Send)]
impl Storage for IndexedDbStorage {
    async fn put(&self, collection: Collection, key: &str, json: &str) -> Result<()> {
        let name = collection.store_name();
        let tx = self.db.transaction(&[name], TransactionMode::ReadWrite)?;
        let store = tx.store(name)?;

        let row = StoredRow {
            id: key.to_string(),
            body: json.to_string(),
        };
        let js_value = serde_wasm_bindgen::to_value(&row)?;

        store.put(&js_value, None).await?;
        tx.done().await?;

        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        let name = collection.store_name();
        let tx = self.db.transaction(&[name], TransactionMode::ReadOnly)?;
        let store = tx.store(name)?;

        let value = store.get(JsValue::from_str(key)).await?;
        match value {
            Some(v) => Ok(Some(Self::decode_row(v)?.body)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        let name = collection.store_name();
        let tx = self.db.transaction(&[name], TransactionMode::ReadOnly)?;
        let store = tx.store(name)?;

        // IndexedDBは主キー昇順で返す
        let all = store.get_all(None, None).await?;

        let mut rows = Vec::with_capacity(all.len());
        for value in all {
            match Self::decode_row(value) {
                Ok(row) => rows.push((row.id, row.body)),
                Err(e) => log::warn!("Skipping malformed row in {}: {}", name, e),
            }
        }

        Ok(rows)
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        let name = collection.store_name();
        let tx = self.db.transaction(&[name], TransactionMode::ReadWrite)?;
        let store = tx.store(name)?;

        store.delete(JsValue::from_str(key)).await?;
        tx.done().await?;

        Ok(())
    }
}

/// 初回アクセス時にDBを開くStorage
///
/// Service Workerはイベントリスナーを同期的に登録する必要があるため、
/// DBのオープンは最初の操作まで遅延する。開けなければ `UnavailableStorage` に落ちる。
#[derive(Default)]
pub struct LazyIndexedDbStorage {
    inner: tokio::sync::OnceCell<Box<dyn Storage>>,
}

impl LazyIndexedDbStorage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn inner(&self) -> &dyn Storage {
        self.inner
            .get_or_init(|| async {
                match IndexedDbStorage::open().await {
                    Ok(db) => Box::new(db) as Box<dyn Storage>,
                    Err(e) => {
                        log::warn!("Offline storage disabled: {}", e);
                        Box::new(UnavailableStorage::new(e.to_string()))
                    }
                }
            })
            .await
            .as_ref()
    }
}

#[async_trait(?Send)]
impl Storage for LazyIndexedDbStorage {
    async fn put(&self, collection: Collection, key: &str, json: &str) -> Result<()> {
        self.inner().await.put(collection, key, json).await
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<String>> {
        self.inner().await.get(collection, key).await
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, String)>> {
        self.inner().await.get_all(collection).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        self.inner().await.delete(collection, key).await
    }
}
