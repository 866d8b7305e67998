// ブラウザ上でのテスト
// Service Worker側のリスナーはヘッドレスブラウザでは発火させられないので、
// ウィンドウ側の設定とエントリポイントだけを確認する

#![cfg(target_arch = "wasm32")]

use storyshare_app::{load_window_config, load_worker_config, save_window_config, StoryShareApp};
use storyshare_core::config::{AppConfig, DEFAULT_BASE_URL};
use storyshare_core::transport::fetch::{to_web_request, to_web_response};
use storyshare_core::transport::{FormPart, HttpBody, HttpRequest, HttpResponse};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn local_storage() -> web_sys::Storage {
    web_sys::window().unwrap().local_storage().unwrap().unwrap()
}

#[wasm_bindgen_test]
fn test_window_config_defaults_when_missing() {
    local_storage().remove_item("storyshare_config").unwrap();
    assert_eq!(load_window_config(), AppConfig::default());
}

#[wasm_bindgen_test]
fn test_window_config_ignores_garbage() {
    local_storage().set_item("storyshare_config", "{not json").unwrap();
    assert_eq!(load_window_config().base_url, DEFAULT_BASE_URL);
    local_storage().remove_item("storyshare_config").unwrap();
}

#[wasm_bindgen_test]
fn test_window_config_persists() {
    let mut config = AppConfig::default();
    config.base_url = "https://staging.example.test/v1".to_string();
    save_window_config(&config);

    assert_eq!(load_window_config().base_url, "https://staging.example.test/v1");
    local_storage().remove_item("storyshare_config").unwrap();
}

#[wasm_bindgen_test]
fn test_worker_config_outside_worker_is_default() {
    assert_eq!(load_worker_config(), AppConfig::default());
}

#[wasm_bindgen_test]
async fn test_app_starts_with_empty_outbox() {
    let app = StoryShareApp::new();
    let count = JsFuture::from(app.pending_count()).await.unwrap();
    assert_eq!(count, JsValue::from_f64(0.0));
}

#[wasm_bindgen_test]
fn test_multipart_request_is_built() {
    let request = HttpRequest::post(
        "https://story-api.dicoding.dev/v1/stories",
        HttpBody::Multipart(vec![
            FormPart::Text {
                name: "description".to_string(),
                value: "Hello".to_string(),
            },
            FormPart::File {
                name: "photo".to_string(),
                file_name: "photo.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                bytes: vec![1, 2, 3],
            },
        ]),
    )
    .bearer("tok");

    let web_request = to_web_request(&request).unwrap();
    assert_eq!(web_request.method(), "POST");
    assert_eq!(web_request.headers().get("Authorization").unwrap().as_deref(), Some("Bearer tok"));
    assert!(web_request.body().is_some());
}

#[wasm_bindgen_test]
fn test_no_content_response_has_no_body() {
    let response = to_web_response(&HttpResponse::new(204, "")).unwrap().unwrap();
    assert_eq!(response.status(), 204);
    assert!(response.body().is_none());

    let not_modified = to_web_response(&HttpResponse::new(304, "stale")).unwrap().unwrap();
    assert_eq!(not_modified.status(), 304);
}
