//! ブラウザ（ウィンドウ / Service Worker）共通のJSヘルパー

use js_sys::{Promise, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, Response, ServiceWorkerGlobalScope, ServiceWorkerRegistration, WorkerGlobalScope};

use crate::error::{CoreError, Result};

/// Service Workerのグローバルスコープ（ウィンドウではNone）
pub fn service_worker_scope() -> Option<ServiceWorkerGlobalScope> {
    js_sys::global().dyn_into::<ServiceWorkerGlobalScope>().ok()
}

/// どちらのコンテキストでも使えるfetch
///
/// Promiseがrejectされた場合はレスポンスが得られなかったとみなす。
pub async fn fetch(request: &Request) -> Result<Response> {
    let promise = match web_sys::window() {
        Some(window) => window.fetch_with_request(request),
        None => js_sys::global()
            .unchecked_into::<WorkerGlobalScope>()
            .fetch_with_request(request),
    };

    let value = JsFuture::from(promise)
        .await
        .map_err(|e| CoreError::Connectivity(js_error_message(&e)))?;
    Ok(value.dyn_into::<Response>()?)
}

/// 現在のService Worker登録を取得
pub async fn current_registration() -> Result<ServiceWorkerRegistration> {
    if let Some(scope) = service_worker_scope() {
        return Ok(scope.registration());
    }

    let container = service_worker_container()?;
    let ready: Promise = Reflect::get(&container, &JsValue::from_str("ready"))?.dyn_into()?;
    Ok(JsFuture::from(ready).await?.dyn_into()?)
}

/// ウィンドウから制御中のService Workerにメッセージを送る
///
/// 制御されていない場合はfalse
pub fn post_to_controller(message: &JsValue) -> Result<bool> {
    let container = service_worker_container()?;
    let controller = Reflect::get(&container, &JsValue::from_str("controller"))?;
    if controller.is_null() || controller.is_undefined() {
        return Ok(false);
    }

    let post: js_sys::Function = Reflect::get(&controller, &JsValue::from_str("postMessage"))?.dyn_into()?;
    post.call1(&controller, message)?;
    Ok(true)
}

fn service_worker_container() -> Result<JsValue> {
    let window = web_sys::window().ok_or_else(|| CoreError::Other("No window".to_string()))?;
    let container = Reflect::get(&window.navigator(), &JsValue::from_str("serviceWorker"))?;
    if container.is_undefined() {
        return Err(CoreError::Other("Service workers are not supported".to_string()));
    }
    Ok(container)
}

/// JS例外からメッセージを取り出す
pub fn js_error_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    Reflect::get(value, &JsValue::from_str("message"))
        .ok()
        .and_then(|m| m.as_string())
        .unwrap_or_else(|| format!("{:?}", value))
}

/// JSON文字列をJSオブジェクトにする（postMessage用）
pub fn json_to_js(json: &str) -> Result<JsValue> {
    Ok(js_sys::JSON::parse(json)?)
}

/// JSオブジェクトをJSON文字列にする
pub fn js_to_json(value: &JsValue) -> Result<String> {
    js_sys::JSON::stringify(value)?
        .as_string()
        .ok_or_else(|| CoreError::ParseError("JSON.stringify returned a non-string".to_string()))
}
