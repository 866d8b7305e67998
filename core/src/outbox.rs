use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use js_sys::Reflect;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use crate::error::{CoreError, Result};
use crate::storage::{Collection, Storage};
use crate::types::OutboxEntry;
use crate::web;

/// 送信キュー（Outbox）
///
/// 状態はすべて永続ストアにあり、メモリには何も持たない。
/// ウィンドウとService Workerのどちらからも同じように使える。
pub struct OutboxQueue {
    storage: Arc<dyn Storage>,
}

impl OutboxQueue {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// エントリをキューに追加（同じIDなら上書き）
    pub async fn enqueue(&self, entry: &OutboxEntry) -> Result<String> {
        self.storage.put_record(entry).await?;
        log::info!("Outbox: queued {}", entry.id);
        Ok(entry.id.clone())
    }

    /// 保留中のエントリを投入順（created_at, id）で取得
    pub async fn pending(&self) -> Result<Vec<OutboxEntry>> {
        let mut entries: Vec<OutboxEntry> = self.storage.get_all_records().await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    pub async fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        self.storage.get_record(id).await
    }

    /// キューから削除
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.storage.delete(Collection::Outbox, id).await?;
        log::info!("Outbox: removed {}", id);
        Ok(())
    }

    /// キューのサイズ
    pub async fn len(&self) -> Result<usize> {
        Ok(self.storage.get_all(Collection::Outbox).await?.len())
    }

    /// キューが空か
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// プラットフォームのバックグラウンド同期を要求する
///
/// 接続が戻ったときにプラットフォームが同期イベントを発火する。
#[async_trait(?Send)]
pub trait SyncScheduler {
    async fn request_sync(&self, tag: &str) -> Result<()>;
}

/// Background Sync API（`registration.sync.register(tag)`）
#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundSyncScheduler;

#[async_trait(?Send)]
impl SyncScheduler for BackgroundSyncScheduler {
    async fn request_sync(&self, tag: &str) -> Result<()> {
        let registration = web::current_registration().await?;
        let sync = Reflect::get(&registration, &JsValue::from_str("sync"))?;
        if sync.is_undefined() {
            // 非対応ブラウザではフォアグラウンドのonlineイベントで代替する
            return Err(CoreError::Other("Background Sync is not supported".to_string()));
        }

        let register: js_sys::Function = Reflect::get(&sync, &JsValue::from_str("register"))?.dyn_into()?;
        let promise: js_sys::Promise = register.call1(&sync, &JsValue::from_str(tag))?.dyn_into()?;
        JsFuture::from(promise).await?;

        log::info!("Background sync registered: {}", tag);
        Ok(())
    }
}

/// 要求されたタグを記録するだけのScheduler（テスト用）
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    tags: Arc<Mutex<Vec<String>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl SyncScheduler for RecordingScheduler {
    async fn request_sync(&self, tag: &str) -> Result<()> {
        self.tags.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockStorage;
    use crate::types::{Photo, StoryPayload};

    fn entry(id: &str, created_at: i64) -> OutboxEntry {
        OutboxEntry {
            id: id.to_string(),
            payload: StoryPayload {
                description: format!("story {}", id),
                photo: Photo {
                    file_name: "p.jpg".to_string(),
                    mime_type: "image/jpeg".to_string(),
                    bytes: vec![7],
                },
                location: None,
            },
            auth_snapshot: "token".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_enqueue() {
        let storage = Arc::new(MockStorage::new());
        let queue = OutboxQueue::new(storage);

        let id = queue.enqueue(&entry("a", 1)).await.unwrap();

        assert_eq!(id, "a");
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_same_id_keeps_one_entry() {
        let storage = Arc::new(MockStorage::new());
        let queue = OutboxQueue::new(storage);

        queue.enqueue(&entry("a", 1)).await.unwrap();
        queue.enqueue(&entry("a", 1)).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_is_fifo_by_creation() {
        let storage = Arc::new(MockStorage::new());
        let queue = OutboxQueue::new(storage);

        queue.enqueue(&entry("z-late", 30)).await.unwrap();
        queue.enqueue(&entry("a-early", 10)).await.unwrap();
        queue.enqueue(&entry("m-middle", 20)).await.unwrap();

        let ids: Vec<String> = queue.pending().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a-early", "m-middle", "z-late"]);
    }

    #[tokio::test]
    async fn test_state_survives_new_queue_instance() {
        let storage = MockStorage::new();
        OutboxQueue::new(Arc::new(storage.clone()))
            .enqueue(&entry("a", 1))
            .await
            .unwrap();

        // 別コンテキスト（再起動後）から同じストアを開く
        let reopened = OutboxQueue::new(Arc::new(storage));
        assert_eq!(reopened.pending().await.unwrap().len(), 1);
        reopened.remove("a").await.unwrap();
        assert!(reopened.is_empty().await.unwrap());
    }
}
