use async_trait::async_trait;
use js_sys::Reflect;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Cache, CacheStorage, Request, Response};

use crate::cache::OpaqueBodyStore;
use crate::error::{CoreError, Result};

/// ブラウザのCache Storage
///
/// opaqueレスポンスはJSのResponseのまま保存するしかないので、本体だけをここに置く。
#[derive(Debug, Clone)]
pub struct BrowserCache {
    name: String,
}

impl BrowserCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    async fn open(&self) -> Result<Cache> {
        let caches = Reflect::get(&js_sys::global(), &JsValue::from_str("caches"))?;
        if caches.is_undefined() {
            return Err(CoreError::StorageUnavailable("Cache Storage is not available".to_string()));
        }
        let caches: CacheStorage = caches.dyn_into()?;
        Ok(JsFuture::from(caches.open(&self.name)).await?.dyn_into()?)
    }

    pub async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        let cache = self.open().await?;
        let hit = JsFuture::from(cache.match_with_request(request)).await?;
        if hit.is_undefined() || hit.is_null() {
            return Ok(None);
        }
        Ok(Some(hit.dyn_into()?))
    }

    pub async fn store(&self, request: &Request, response: &Response) -> Result<()> {
        let cache = self.open().await?;
        JsFuture::from(cache.put_with_request(request, response)).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl OpaqueBodyStore for BrowserCache {
    async fn remove(&self, cache_name: &str, key: &str) -> Result<()> {
        if cache_name != self.name {
            return Ok(());
        }
        let cache = self.open().await?;
        JsFuture::from(cache.delete_with_str(key)).await?;
        Ok(())
    }
}
