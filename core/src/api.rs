use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::transport::{FormPart, HttpBody, HttpRequest, HttpResponse, Method, Transport};
use crate::types::{LoginResult, PushSubscriptionState, Story, StoryPayload};

/// APIの共通エンベロープ `{error, message, ...}`
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StoryList {
    #[serde(rename = "listStory", default)]
    list_story: Vec<Story>,
}

#[derive(Debug, Deserialize)]
struct StoryDetail {
    story: Story,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "loginResult")]
    login_result: LoginResult,
}

/// ストーリー一覧の取得条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub size: u32,
    pub with_location: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            size: 20,
            with_location: true,
        }
    }
}

/// Story APIクライアント
///
/// レスポンスは境界でデコードし、`Ok(data)` か分類済みの `CoreError` にする。
pub struct StoryApi {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl StoryApi {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stories_url(&self) -> String {
        format!("{}/stories", self.base_url)
    }

    pub fn story_url(&self, id: &str) -> String {
        format!("{}/stories/{}", self.base_url, id)
    }

    fn push_url(&self) -> String {
        format!("{}/notifications/subscribe", self.base_url)
    }

    /// アカウント作成。成功時はサーバーのメッセージを返す
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String> {
        let body = json!({ "name": name, "email": email, "password": password });
        let request = HttpRequest::post(format!("{}/register", self.base_url), HttpBody::Json(body.to_string()));
        acknowledge(&self.transport.send(request).await?, "User created")
    }

    /// サインイン
    ///
    /// 保存はしない。呼び出し側が `CredentialStore::save` に渡す。
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
        let body = json!({ "email": email, "password": password });
        let request = HttpRequest::post(format!("{}/login", self.base_url), HttpBody::Json(body.to_string()));
        let response: LoginResponse = decode(&self.transport.send(request).await?)?;
        Ok(response.login_result)
    }

    /// 投稿エンドポイントへの書き込みか
    pub fn is_submission(&self, method: Method, url: &str) -> bool {
        method == Method::Post && strip_query(url) == self.stories_url()
    }

    /// 一覧・詳細の読み込みか
    pub fn is_story_read(&self, method: Method, url: &str) -> bool {
        if method != Method::Get {
            return false;
        }
        let path = strip_query(url);
        let list = self.stories_url();
        path == list
            || path
                .strip_prefix(&format!("{}/", list))
                .map(|id| !id.is_empty() && !id.contains('/'))
                .unwrap_or(false)
    }

    /// multipartの投稿リクエストを組み立てる
    pub fn add_story_request(&self, token: &str, payload: &StoryPayload) -> HttpRequest {
        let mut parts = vec![
            FormPart::Text {
                name: "description".to_string(),
                value: payload.description.clone(),
            },
            FormPart::File {
                name: "photo".to_string(),
                file_name: payload.photo.file_name.clone(),
                mime_type: payload.photo.mime_type.clone(),
                bytes: payload.photo.bytes.clone(),
            },
        ];
        if let Some(location) = payload.location {
            parts.push(FormPart::Text {
                name: "lat".to_string(),
                value: location.lat.to_string(),
            });
            parts.push(FormPart::Text {
                name: "lon".to_string(),
                value: location.lon.to_string(),
            });
        }

        HttpRequest::post(self.stories_url(), HttpBody::Multipart(parts)).bearer(token)
    }

    /// ストーリー投稿。成功時はサーバーのメッセージを返す
    ///
    /// 2xxならサーバーには保存済みなので、本文が読めなくても成功とする。
    pub async fn add_story(&self, token: &str, payload: &StoryPayload) -> Result<String> {
        let response = self.transport.send(self.add_story_request(token, payload)).await?;
        acknowledge(&response, "Story created")
    }

    pub async fn get_stories(&self, token: &str, query: ListQuery) -> Result<Vec<Story>> {
        let url = format!(
            "{}?page={}&size={}&location={}",
            self.stories_url(),
            query.page,
            query.size,
            if query.with_location { 1 } else { 0 }
        );
        let response = self.transport.send(HttpRequest::get(url).bearer(token)).await?;
        let list: StoryList = decode(&response)?;
        Ok(list.list_story)
    }

    pub async fn get_story(&self, token: &str, id: &str) -> Result<Story> {
        let response = self
            .transport
            .send(HttpRequest::get(self.story_url(id)).bearer(token))
            .await?;
        let detail: StoryDetail = decode(&response)?;
        Ok(detail.story)
    }

    /// Push購読をサーバーに登録
    pub async fn subscribe_push(&self, token: &str, subscription: &PushSubscriptionState) -> Result<String> {
        let body = json!({
            "endpoint": subscription.endpoint,
            "keys": subscription.keys,
        });
        let request = HttpRequest::post(self.push_url(), HttpBody::Json(body.to_string())).bearer(token);
        acknowledge(&self.transport.send(request).await?, "Subscribed")
    }

    /// Push購読をサーバーから削除
    pub async fn unsubscribe_push(&self, token: &str, endpoint: &str) -> Result<String> {
        let body = json!({ "endpoint": endpoint });
        let request = HttpRequest::delete(self.push_url(), HttpBody::Json(body.to_string())).bearer(token);
        acknowledge(&self.transport.send(request).await?, "Unsubscribed")
    }
}

/// ステータスと本文からレスポンスを分類してデコードする
///
/// * 2xx → 本文をデコード
/// * 401 / 403 → `Auth`
/// * その他の4xx → `Validation`
/// * 5xx → `Server`（再送可能）
pub fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    if !response.is_success() {
        return Err(classify_failure(response));
    }
    if read_envelope(response).map(|e| e.error).unwrap_or(false) {
        return Err(CoreError::Validation(envelope_message(response, "Request rejected")));
    }
    Ok(serde_json::from_slice(&response.body)?)
}

/// 書き込み系のレスポンスを分類する
///
/// 2xxは本文に関係なく成功。メッセージはエンベロープが読めたときだけ使う。
pub fn acknowledge(response: &HttpResponse, default_message: &str) -> Result<String> {
    if response.is_success() {
        Ok(envelope_message(response, default_message))
    } else {
        Err(classify_failure(response))
    }
}

fn classify_failure(response: &HttpResponse) -> CoreError {
    match response.status {
        401 | 403 => CoreError::Auth(envelope_message(response, "Session expired, please sign in again")),
        400..=499 => CoreError::Validation(envelope_message(
            response,
            &format!("Request rejected with status {}", response.status),
        )),
        500..=599 => CoreError::Server {
            status: response.status,
            message: envelope_message(response, "Server error"),
        },
        status => CoreError::Other(format!("Unexpected response status {}", status)),
    }
}

fn read_envelope(response: &HttpResponse) -> Option<Envelope> {
    serde_json::from_slice::<Envelope>(&response.body).ok()
}

fn envelope_message(response: &HttpResponse, fallback: &str) -> String {
    read_envelope(response)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::types::Photo;

    fn api() -> (StoryApi, MockTransport) {
        let transport = MockTransport::new();
        let api = StoryApi::new(Arc::new(transport.clone()), "https://story-api.dicoding.dev/v1/");
        (api, transport)
    }

    fn payload(description: &str) -> StoryPayload {
        StoryPayload {
            description: description.to_string(),
            photo: Photo {
                file_name: "photo.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                bytes: vec![1, 2, 3],
            },
            location: None,
        }
    }

    #[test]
    fn test_decode_classifies_statuses() {
        let unauthorized = HttpResponse::json(401, &json!({"error": true, "message": "Token expired"}));
        assert_eq!(
            decode::<serde_json::Value>(&unauthorized).unwrap_err(),
            CoreError::Auth("Token expired".to_string())
        );

        let bad = HttpResponse::json(400, &json!({"error": true, "message": "\"photo\" is required"}));
        assert!(matches!(decode::<serde_json::Value>(&bad), Err(CoreError::Validation(_))));

        let bad_without_body = HttpResponse::new(413, "");
        match decode::<serde_json::Value>(&bad_without_body) {
            Err(CoreError::Validation(m)) => assert!(m.contains("413")),
            other => panic!("Expected validation error, got {:?}", other),
        }

        let down = HttpResponse::new(503, "<html>");
        assert!(decode::<serde_json::Value>(&down).unwrap_err().is_retryable());
    }

    #[test]
    fn test_decode_rejects_malformed_success_body() {
        let html = HttpResponse::new(200, "<html></html>");
        assert!(matches!(decode::<StoryList>(&html), Err(CoreError::ParseError(_))));
    }

    #[test]
    fn test_acknowledge_accepts_any_success_body() {
        assert_eq!(acknowledge(&HttpResponse::new(201, ""), "Story created").unwrap(), "Story created");
        assert_eq!(acknowledge(&HttpResponse::new(200, "OK"), "Story created").unwrap(), "Story created");
        let created = HttpResponse::json(201, &json!({"error": false, "message": "success"}));
        assert_eq!(acknowledge(&created, "Story created").unwrap(), "success");

        let expired = HttpResponse::json(401, &json!({"error": true, "message": "Token expired"}));
        assert_eq!(
            acknowledge(&expired, "Story created").unwrap_err(),
            CoreError::Auth("Token expired".to_string())
        );
    }

    #[test]
    fn test_route_matching() {
        let (api, _) = api();
        assert!(api.is_submission(Method::Post, "https://story-api.dicoding.dev/v1/stories"));
        assert!(!api.is_submission(Method::Get, "https://story-api.dicoding.dev/v1/stories"));
        assert!(api.is_story_read(Method::Get, "https://story-api.dicoding.dev/v1/stories?page=1&size=20"));
        assert!(api.is_story_read(Method::Get, "https://story-api.dicoding.dev/v1/stories/story-1"));
        assert!(!api.is_story_read(Method::Get, "https://story-api.dicoding.dev/v1/stories/a/b"));
        assert!(!api.is_story_read(Method::Get, "https://story-api.dicoding.dev/images/stories/a.jpg"));
    }

    #[test]
    fn test_add_story_request_includes_location_only_when_present() {
        let (api, _) = api();
        let mut with_location = payload("Hi");
        with_location.location = Some(crate::types::GeoPoint { lat: -6.2, lon: 106.8 });

        let request = api.add_story_request("tok", &with_location);
        assert_eq!(request.header_value("Authorization"), Some("Bearer tok"));
        match &request.body {
            HttpBody::Multipart(parts) => {
                assert_eq!(parts.len(), 4);
                assert!(parts.contains(&FormPart::Text {
                    name: "lat".to_string(),
                    value: "-6.2".to_string()
                }));
            }
            other => panic!("Expected multipart, got {:?}", other),
        }

        match &api.add_story_request("tok", &payload("Hi")).body {
            HttpBody::Multipart(parts) => assert_eq!(parts.len(), 2),
            other => panic!("Expected multipart, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_story_and_list() {
        let (api, transport) = api();
        let message = api.add_story("tok", &payload("Hello")).await.unwrap();
        assert_eq!(message, "success");

        let stories = api.get_stories("tok", ListQuery::default()).await.unwrap();
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].description, "Hello");

        let detail = api.get_story("tok", &stories[0].id).await.unwrap();
        assert_eq!(detail, stories[0]);
        assert_eq!(transport.request_count(Method::Get, "/v1/stories"), 2);
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (api, transport) = api();
        api.register("Dimas", "dimas@example.com", "secret123").await.unwrap();

        let duplicate = api.register("Other", "dimas@example.com", "secret123").await;
        assert_eq!(
            duplicate.unwrap_err(),
            CoreError::Validation("Email is already taken".to_string())
        );

        let result = api.login("dimas@example.com", "secret123").await.unwrap();
        assert_eq!(result.name, "Dimas");
        assert!(!result.token.is_empty());
        assert!(result.user_id.starts_with("user-"));
        assert_eq!(transport.request_count(Method::Post, "/v1/login"), 1);
    }

    #[tokio::test]
    async fn test_login_with_wrong_password_is_auth_error() {
        let (api, _) = api();
        api.register("Dimas", "dimas@example.com", "secret123").await.unwrap();
        let err = api.login("dimas@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)));
    }

    #[test]
    fn test_decode_login_result() {
        let response = HttpResponse::json(
            200,
            &json!({
                "error": false,
                "message": "success",
                "loginResult": {"userId": "user-yj5pc_LARC_AgK61", "name": "Arif Faizin", "token": "eyJhbGci"}
            }),
        );
        let decoded: LoginResponse = decode(&response).unwrap();
        assert_eq!(decoded.login_result.user_id, "user-yj5pc_LARC_AgK61");
        assert_eq!(decoded.login_result.token, "eyJhbGci");
    }

    #[tokio::test]
    async fn test_offline_is_connectivity_error() {
        let (api, transport) = api();
        transport.set_online(false);
        let err = api.add_story("tok", &payload("Hello")).await.unwrap_err();
        assert!(matches!(err, CoreError::Connectivity(_)));
    }
}
