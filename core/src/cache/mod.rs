pub mod web;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{Collection, Record, Storage};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{current_millis, hex_bytes};

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

pub const STORY_CACHE_NAME: &str = "story-api-cache";
pub const IMAGE_CACHE_NAME: &str = "story-images-cache";

/// キャッシュの上限（件数と経過時間）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub max_entries: usize,
    pub max_age_ms: i64,
}

impl CachePolicy {
    /// ストーリー一覧・詳細: 50件 / 24時間
    pub fn stories() -> Self {
        Self {
            max_entries: 50,
            max_age_ms: DAY_MS,
        }
    }

    /// 画像: 60件 / 30日
    pub fn images() -> Self {
        Self {
            max_entries: 60,
            max_age_ms: 30 * DAY_MS,
        }
    }
}

/// 保存されたレスポンス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub opaque: bool,
    pub headers: Vec<(String, String)>,
    #[serde(with = "hex_bytes")]
    pub body: Vec<u8>,
}

impl From<&HttpResponse> for CachedResponse {
    fn from(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            opaque: response.opaque,
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

impl From<CachedResponse> for HttpResponse {
    fn from(cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            opaque: cached.opaque,
            headers: cached.headers,
            body: cached.body,
        }
    }
}

/// キャッシュエントリのメタデータ
///
/// 本体は `CacheBodies` に同じIDで保存する。件数・期限の判定はメタデータだけで行う。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub cache_name: String,
    pub key: String,
    pub inserted_at: i64,
    /// 本体がブラウザ側（Cache Storage）にある
    #[serde(default)]
    pub opaque: bool,
}

impl Record for CacheEntry {
    const COLLECTION: Collection = Collection::CacheEntries;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheBody {
    id: String,
    response: CachedResponse,
}

impl Record for CacheBody {
    const COLLECTION: Collection = Collection::CacheBodies;

    fn key(&self) -> &str {
        &self.id
    }
}

/// キャッシュ可能なレスポンスか（200、またはクロスオリジンのopaque）
pub fn is_cacheable(response: &HttpResponse) -> bool {
    if response.opaque {
        return response.status == 0;
    }
    response.status == 200
}

/// opaqueレスポンスの本体の置き場所
///
/// opaqueの本体はRustから読めないので、ブラウザのCache Storageに置く。
/// 件数と期限の管理はBoundedCacheのメタデータで行い、削除だけをここに伝える。
#[async_trait(?Send)]
pub trait OpaqueBodyStore {
    async fn remove(&self, cache_name: &str, key: &str) -> Result<()>;
}

/// 件数と経過時間で制限された名前付きキャッシュ
///
/// 書き込みのたびに上限を適用し、古いものから削除する。
pub struct BoundedCache {
    name: String,
    policy: CachePolicy,
    storage: Arc<dyn Storage>,
    opaque_bodies: Option<Arc<dyn OpaqueBodyStore>>,
}

impl BoundedCache {
    pub fn new(name: impl Into<String>, policy: CachePolicy, storage: Arc<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            policy,
            storage,
            opaque_bodies: None,
        }
    }

    pub fn with_opaque_bodies(mut self, store: Arc<dyn OpaqueBodyStore>) -> Self {
        self.opaque_bodies = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn entry_id(&self, key: &str) -> String {
        format!("{}|{}", self.name, key)
    }

    fn is_expired(&self, entry: &CacheEntry, now: i64) -> bool {
        now - entry.inserted_at > self.policy.max_age_ms
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        self.get_at(key, current_millis()).await
    }

    /// 期限切れはミスとして扱い、その場で削除する
    pub async fn get_at(&self, key: &str, now: i64) -> Result<Option<CachedResponse>> {
        let id = self.entry_id(key);
        let Some(entry) = self.storage.get_record::<CacheEntry>(&id).await? else {
            return Ok(None);
        };
        if self.is_expired(&entry, now) {
            log::debug!("Cache {}: expired {}", self.name, key);
            self.remove_entry(&entry).await?;
            return Ok(None);
        }

        match self.storage.get_record::<CacheBody>(&id).await? {
            Some(body) => Ok(Some(body.response)),
            None => {
                // 本体の書き込み前に中断された
                self.storage.delete_record::<CacheEntry>(&id).await?;
                Ok(None)
            }
        }
    }

    pub async fn put(&self, key: &str, response: &HttpResponse) -> Result<()> {
        self.put_at(key, response, current_millis()).await
    }

    pub async fn put_at(&self, key: &str, response: &HttpResponse, now: i64) -> Result<()> {
        let id = self.entry_id(key);
        // 同じミリ秒の書き込みでも挿入順が保たれるようにする
        let newest = self
            .entries()
            .await?
            .into_iter()
            .filter(|e| e.id != id)
            .map(|e| e.inserted_at)
            .max();
        let inserted_at = newest.map_or(now, |newest| now.max(newest + 1));

        self.storage
            .put_record(&CacheBody {
                id: id.clone(),
                response: CachedResponse::from(response),
            })
            .await?;
        self.storage
            .put_record(&CacheEntry {
                id,
                cache_name: self.name.clone(),
                key: key.to_string(),
                inserted_at,
                opaque: response.opaque,
            })
            .await?;

        self.enforce_at(now).await?;
        Ok(())
    }

    /// このキャッシュのエントリ（古い順）
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<CacheEntry> = self
            .storage
            .get_all_records::<CacheEntry>()
            .await?
            .into_iter()
            .filter(|e| e.cache_name == self.name)
            .collect();
        entries.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.entries().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// 期限切れを削除し、件数が上限を超えていれば古い順に削除する
    ///
    /// 削除した件数を返す
    pub async fn enforce_at(&self, now: i64) -> Result<usize> {
        let (expired, live): (Vec<CacheEntry>, Vec<CacheEntry>) = self
            .entries()
            .await?
            .into_iter()
            .partition(|e| self.is_expired(e, now));

        let overflow = live.len().saturating_sub(self.policy.max_entries);
        let evicted: Vec<&CacheEntry> = expired.iter().chain(live.iter().take(overflow)).collect();

        for entry in &evicted {
            self.remove_entry(entry).await?;
        }
        if !evicted.is_empty() {
            log::debug!("Cache {}: evicted {} entries", self.name, evicted.len());
        }
        Ok(evicted.len())
    }

    async fn remove_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.storage.delete_record::<CacheEntry>(&entry.id).await?;
        self.storage.delete_record::<CacheBody>(&entry.id).await?;

        if let (true, Some(store)) = (entry.opaque, &self.opaque_bodies) {
            if let Err(e) = store.remove(&self.name, &entry.key).await {
                log::warn!("Cache {}: could not drop body of {}: {}", self.name, entry.key, e);
            }
        }
        Ok(())
    }
}

/// 画像キャッシュの引き当て結果
#[derive(Debug, Clone, PartialEq)]
pub enum ImageHit {
    /// 本体ごと保存されている
    Body(HttpResponse),
    /// メタデータのみ。本体は `OpaqueBodyStore` 側
    Opaque,
    Miss,
}

/// キャッシュ層が返したレスポンス
#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub response: HttpResponse,
    pub from_cache: bool,
    /// バックグラウンドで再検証すべきか
    pub revalidate: bool,
}

/// 読み込み経路のキャッシュ戦略
///
/// * ストーリーAPI: stale-while-revalidate
/// * 画像: cache-first
///
/// ストアが使えない場合はネットワークのみで動作する。
pub struct CacheStrategyLayer {
    transport: Arc<dyn Transport>,
    stories: BoundedCache,
    images: BoundedCache,
}

impl CacheStrategyLayer {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        story_policy: CachePolicy,
        image_policy: CachePolicy,
    ) -> Self {
        Self {
            transport,
            stories: BoundedCache::new(STORY_CACHE_NAME, story_policy, storage.clone()),
            images: BoundedCache::new(IMAGE_CACHE_NAME, image_policy, storage),
        }
    }

    /// 画像キャッシュのopaque本体の置き場所を設定する
    pub fn with_opaque_bodies(mut self, store: Arc<dyn OpaqueBodyStore>) -> Self {
        self.images = self.images.with_opaque_bodies(store);
        self
    }

    pub fn stories(&self) -> &BoundedCache {
        &self.stories
    }

    pub fn images(&self) -> &BoundedCache {
        &self.images
    }

    /// ヒットすればキャッシュを即座に返して再検証を要求、ミスならネットワーク
    pub async fn stale_while_revalidate(&self, request: &HttpRequest) -> Result<Served> {
        if let Some(cached) = lookup(&self.stories, request).await {
            return Ok(Served {
                response: cached.into(),
                from_cache: true,
                revalidate: true,
            });
        }

        let response = self.fetch_and_store(&self.stories, request).await?;
        Ok(Served {
            response,
            from_cache: false,
            revalidate: false,
        })
    }

    /// ヒットすればキャッシュ、ミスならネットワークから取得して保存
    ///
    /// opaqueのヒットは空の本体で返る。本体は `OpaqueBodyStore` から取り出すこと。
    pub async fn cache_first(&self, request: &HttpRequest) -> Result<Served> {
        let response = match self.image_hit(request.cache_key()).await {
            ImageHit::Body(response) => Some(response),
            ImageHit::Opaque => Some(HttpResponse::opaque()),
            ImageHit::Miss => None,
        };
        if let Some(response) = response {
            return Ok(Served {
                response,
                from_cache: true,
                revalidate: false,
            });
        }

        let response = self.transport.send(request.clone()).await?;
        self.store_image(request.cache_key(), &response).await;
        Ok(Served {
            response,
            from_cache: false,
            revalidate: false,
        })
    }

    /// 画像キャッシュを引く（ストアのエラーはミス扱い）
    pub async fn image_hit(&self, key: &str) -> ImageHit {
        match self.images.get(key).await {
            Ok(Some(cached)) if cached.opaque => ImageHit::Opaque,
            Ok(Some(cached)) => ImageHit::Body(cached.into()),
            Ok(None) => ImageHit::Miss,
            Err(e) => {
                log::warn!("Cache {}: lookup failed, using network: {}", self.images.name(), e);
                ImageHit::Miss
            }
        }
    }

    /// キャッシュ可能なら画像を保存する（失敗はログのみ）
    ///
    /// opaqueの場合、本体は呼び出し側が先に `OpaqueBodyStore` へ置いておく。
    pub async fn store_image(&self, key: &str, response: &HttpResponse) {
        store(&self.images, key, response).await;
    }

    /// バックグラウンド再検証（失敗は握りつぶす）
    pub async fn revalidate(&self, request: &HttpRequest) {
        if let Err(e) = self.fetch_and_store(&self.stories, request).await {
            log::warn!("Background refresh failed for {}: {}", request.url, e);
        }
    }

    async fn fetch_and_store(&self, cache: &BoundedCache, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self.transport.send(request.clone()).await?;
        store(cache, request.cache_key(), &response).await;
        Ok(response)
    }
}

async fn store(cache: &BoundedCache, key: &str, response: &HttpResponse) {
    if !is_cacheable(response) {
        return;
    }
    if let Err(e) = cache.put(key, response).await {
        log::warn!("Cache {}: could not store {}: {}", cache.name(), key, e);
    }
}

async fn lookup(cache: &BoundedCache, request: &HttpRequest) -> Option<CachedResponse> {
    match cache.get(request.cache_key()).await {
        Ok(hit) => hit,
        Err(e) => {
            log::warn!("Cache {}: lookup failed, using network: {}", cache.name(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockStorage;
    use crate::storage::UnavailableStorage;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;

    const T0: i64 = 1_700_000_000_000;

    fn image(n: usize) -> String {
        format!("https://story-api.dicoding.dev/images/stories/{}.jpg", n)
    }

    #[test]
    fn test_is_cacheable() {
        assert!(is_cacheable(&HttpResponse::new(200, "ok")));
        assert!(is_cacheable(&HttpResponse::opaque()));
        assert!(!is_cacheable(&HttpResponse::new(201, "")));
        assert!(!is_cacheable(&HttpResponse::new(404, "")));
        assert!(!is_cacheable(&HttpResponse::new(0, "")));
    }

    #[tokio::test]
    async fn test_sixty_first_image_evicts_the_first() {
        let storage = MockStorage::new();
        let cache = BoundedCache::new(IMAGE_CACHE_NAME, CachePolicy::images(), Arc::new(storage.clone()));

        for n in 1..=60 {
            cache.put_at(&image(n), &HttpResponse::new(200, "img"), T0).await.unwrap();
        }
        assert_eq!(cache.len().await.unwrap(), 60);

        cache.put_at(&image(61), &HttpResponse::new(200, "img"), T0).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 60);
        assert!(cache.get_at(&image(1), T0).await.unwrap().is_none());
        assert!(cache.get_at(&image(2), T0).await.unwrap().is_some());
        assert!(cache.get_at(&image(61), T0).await.unwrap().is_some());
        assert_eq!(storage.count(Collection::CacheBodies), 60);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let storage = MockStorage::new();
        let cache = BoundedCache::new(STORY_CACHE_NAME, CachePolicy::stories(), Arc::new(storage.clone()));
        let key = "https://story-api.dicoding.dev/v1/stories";

        cache.put_at(key, &HttpResponse::new(200, "list"), T0).await.unwrap();
        assert!(cache.get_at(key, T0 + DAY_MS).await.unwrap().is_some());
        assert!(cache.get_at(key, T0 + DAY_MS + 1).await.unwrap().is_none());

        assert_eq!(storage.count(Collection::CacheEntries), 0);
        assert_eq!(storage.count(Collection::CacheBodies), 0);
    }

    #[tokio::test]
    async fn test_insert_purges_expired_entries() {
        let storage = Arc::new(MockStorage::new());
        let cache = BoundedCache::new(STORY_CACHE_NAME, CachePolicy::stories(), storage);

        cache.put_at("old", &HttpResponse::new(200, "a"), T0).await.unwrap();
        let removed_on_insert = T0 + 2 * DAY_MS;
        cache.put_at("new", &HttpResponse::new(200, "b"), removed_on_insert).await.unwrap();

        let keys: Vec<String> = cache.entries().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["new"]);
    }

    #[tokio::test]
    async fn test_rewriting_a_key_moves_it_to_newest() {
        let storage = Arc::new(MockStorage::new());
        let policy = CachePolicy {
            max_entries: 2,
            max_age_ms: DAY_MS,
        };
        let cache = BoundedCache::new("small", policy, storage);

        cache.put_at("a", &HttpResponse::new(200, "1"), T0).await.unwrap();
        cache.put_at("b", &HttpResponse::new(200, "2"), T0).await.unwrap();
        cache.put_at("a", &HttpResponse::new(200, "3"), T0).await.unwrap();
        cache.put_at("c", &HttpResponse::new(200, "4"), T0).await.unwrap();

        let keys: Vec<String> = cache.entries().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(cache.get_at("a", T0).await.unwrap().unwrap().body, b"3".to_vec());
    }

    #[tokio::test]
    async fn test_caches_with_different_names_are_independent() {
        let storage: Arc<dyn Storage> = Arc::new(MockStorage::new());
        let one = BoundedCache::new("one", CachePolicy { max_entries: 1, max_age_ms: DAY_MS }, storage.clone());
        let two = BoundedCache::new("two", CachePolicy { max_entries: 1, max_age_ms: DAY_MS }, storage);

        one.put_at("k", &HttpResponse::new(200, "1"), T0).await.unwrap();
        two.put_at("k", &HttpResponse::new(200, "2"), T0).await.unwrap();

        assert_eq!(one.get_at("k", T0).await.unwrap().unwrap().body, b"1".to_vec());
        assert_eq!(two.get_at("k", T0).await.unwrap().unwrap().body, b"2".to_vec());
    }

    fn layer(transport: &MockTransport, storage: Arc<dyn Storage>) -> CacheStrategyLayer {
        CacheStrategyLayer::new(
            Arc::new(transport.clone()),
            storage,
            CachePolicy::stories(),
            CachePolicy::images(),
        )
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_cache_then_refreshes() {
        let transport = MockTransport::new();
        let layer = layer(&transport, Arc::new(MockStorage::new()));
        let request = HttpRequest::get("https://story-api.dicoding.dev/v1/stories?page=1").bearer("tok");

        let first = layer.stale_while_revalidate(&request).await.unwrap();
        assert!(!first.from_cache);

        transport.set_online(false);
        let second = layer.stale_while_revalidate(&request).await.unwrap();
        assert!(second.from_cache);
        assert!(second.revalidate);
        assert_eq!(second.response.body, first.response.body);

        // オフライン中の再検証は失敗してもキャッシュを壊さない
        layer.revalidate(&request).await;
        assert!(layer.stories().get(request.cache_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_first_skips_network_on_hit() {
        let transport = MockTransport::new();
        let layer = layer(&transport, Arc::new(MockStorage::new()));
        let request = HttpRequest::get(image(1));

        let first = layer.cache_first(&request).await.unwrap();
        let second = layer.cache_first(&request).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert!(!second.revalidate);
        assert_eq!(second.response.body, first.response.body);
        assert_eq!(transport.request_count(Method::Get, "/images/"), 1);
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let transport = MockTransport::new();
        let layer = layer(&transport, Arc::new(MockStorage::new()));
        let request = HttpRequest::get("https://story-api.dicoding.dev/v1/stories/missing");

        let served = layer.stale_while_revalidate(&request).await.unwrap();

        assert_eq!(served.response.status, 404);
        assert!(layer.stories().is_empty().await.unwrap());
    }

    /// 削除要求を記録するだけのopaque本体ストア
    #[derive(Clone, Default)]
    struct RecordingBodies {
        removed: Arc<std::sync::Mutex<Vec<(String, String)>>>,
    }

    #[async_trait(?Send)]
    impl OpaqueBodyStore for RecordingBodies {
        async fn remove(&self, cache_name: &str, key: &str) -> Result<()> {
            self.removed
                .lock()
                .unwrap()
                .push((cache_name.to_string(), key.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_opaque_image_is_a_hit_without_network() {
        let transport = MockTransport::new();
        let layer = layer(&transport, Arc::new(MockStorage::new()));
        let request = HttpRequest::get("https://cdn.example.com/cat.png");
        transport.push_response(HttpResponse::opaque());

        let first = layer.cache_first(&request).await.unwrap();
        assert!(first.response.opaque);
        assert_eq!(layer.image_hit(&request.url).await, ImageHit::Opaque);

        transport.set_online(false);
        let second = layer.cache_first(&request).await.unwrap();
        assert!(second.from_cache);
        assert!(second.response.opaque);
        assert_eq!(transport.request_count(Method::Get, "cdn.example.com"), 1);
    }

    #[tokio::test]
    async fn test_evicting_opaque_entry_drops_browser_body() {
        let bodies = RecordingBodies::default();
        let policy = CachePolicy {
            max_entries: 1,
            max_age_ms: DAY_MS,
        };
        let cache = BoundedCache::new(IMAGE_CACHE_NAME, policy, Arc::new(MockStorage::new()))
            .with_opaque_bodies(Arc::new(bodies.clone()));

        cache.put_at("opaque", &HttpResponse::opaque(), T0).await.unwrap();
        cache.put_at("plain", &HttpResponse::new(200, "img"), T0).await.unwrap();
        cache.put_at("newest", &HttpResponse::new(200, "img"), T0).await.unwrap();

        // 本体を持つエントリの削除はブラウザ側に伝えない
        assert_eq!(
            *bodies.removed.lock().unwrap(),
            vec![(IMAGE_CACHE_NAME.to_string(), "opaque".to_string())]
        );
    }

    #[tokio::test]
    async fn test_expired_opaque_entry_drops_browser_body() {
        let bodies = RecordingBodies::default();
        let cache = BoundedCache::new(IMAGE_CACHE_NAME, CachePolicy::images(), Arc::new(MockStorage::new()))
            .with_opaque_bodies(Arc::new(bodies.clone()));

        cache.put_at("opaque", &HttpResponse::opaque(), T0).await.unwrap();
        assert!(cache.get_at("opaque", T0 + 31 * DAY_MS).await.unwrap().is_none());

        assert_eq!(bodies.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_storage_falls_back_to_network() {
        let transport = MockTransport::new();
        let layer = layer(&transport, Arc::new(UnavailableStorage::new("private mode")));

        let served = layer.cache_first(&HttpRequest::get(image(1))).await.unwrap();

        assert_eq!(served.response.status, 200);
        assert!(!served.from_cache);
    }
}
