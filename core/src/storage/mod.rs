pub mod indexeddb;
pub mod mock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, Result};

/// 永続ストアのコレクション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Outbox,
    Favorites,
    Hidden,
    PushSubscription,
    CacheEntries,
    CacheBodies,
}

impl Collection {
    pub fn store_name(&self) -> &'static str {
        match self {
            Collection::Outbox => "stories_outbox",
            Collection::Favorites => "stories_favorite",
            Collection::Hidden => "stories_hidden",
            Collection::PushSubscription => "push_subscription",
            Collection::CacheEntries => "cache_entries",
            Collection::CacheBodies => "cache_bodies",
        }
    }

    pub fn all() -> &'static [Collection] {
        &[
            Collection::Outbox,
            Collection::Favorites,
            Collection::Hidden,
            Collection::PushSubscription,
            Collection::CacheEntries,
            Collection::CacheBodies,
        ]
    }
}

/// Storage抽象trait
///
/// 主キーのみでアクセスする。保証はレコード単位のアトミック性だけで、
/// レコードをまたぐトランザクションはない。
/// WASM環境ではシングルスレッドのため、Send + Sync要件なし
#[async_trait(?Send)]
pub trait Storage {
    /// 主キーでupsert
    async fn put(&self, collection: Collection, key: &str, json: &str) -> Result<()>;

    /// 主キーで取得
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<String>>;

    /// 全件取得（主キー順）
    async fn get_all(&self, collection: Collection) -> Result<Vec<(String, String)>>;

    /// 主キーで削除（存在しなくてもOk）
    async fn delete(&self, collection: Collection, key: &str) -> Result<()>;
}

/// コレクションに保存できる型
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn key(&self) -> &str;
}

impl dyn Storage {
    pub async fn put_record<R: Record>(&self, record: &R) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.put(R::COLLECTION, record.key(), &json).await
    }

    pub async fn get_record<R: Record>(&self, key: &str) -> Result<Option<R>> {
        match self.get(R::COLLECTION, key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// 壊れたレコードはスキップする
    pub async fn get_all_records<R: Record>(&self) -> Result<Vec<R>> {
        let rows = self.get_all(R::COLLECTION).await?;
        let mut records = Vec::with_capacity(rows.len());
        for (key, json) in rows {
            match serde_json::from_str::<R>(&json) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!(
                    "Skipping undecodable record {} in {}: {}",
                    key,
                    R::COLLECTION.store_name(),
                    e
                ),
            }
        }
        Ok(records)
    }

    pub async fn delete_record<R: Record>(&self, key: &str) -> Result<()> {
        self.delete(R::COLLECTION, key).await
    }
}

/// 永続ストレージが使えない環境用
///
/// 全操作が `StorageUnavailable` を返すので、オフライン機能だけが無効になる。
#[derive(Debug, Clone, Default)]
pub struct UnavailableStorage {
    reason: String,
}

impl UnavailableStorage {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> CoreError {
        CoreError::StorageUnavailable(self.reason.clone())
    }
}

#[async_trait(?Send)]
impl Storage for UnavailableStorage {
    async fn put(&self, _collection: Collection, _key: &str, _json: &str) -> Result<()> {
        Err(self.error())
    }

    async fn get(&self, _collection: Collection, _key: &str) -> Result<Option<String>> {
        Err(self.error())
    }

    async fn get_all(&self, _collection: Collection) -> Result<Vec<(String, String)>> {
        Err(self.error())
    }

    async fn delete(&self, _collection: Collection, _key: &str) -> Result<()> {
        Err(self.error())
    }
}
