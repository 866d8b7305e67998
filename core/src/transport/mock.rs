use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::{CoreError, Result};
use crate::transport::{FormPart, HttpBody, HttpRequest, HttpResponse, Method, Transport};
use crate::types::Story;

#[derive(Default)]
struct MockState {
    online: bool,
    scripted: VecDeque<HttpResponse>,
    requests: Vec<HttpRequest>,
    stories: Vec<Story>,
    expired_tokens: HashSet<String>,
    lose_next_response: bool,
    push_registrations: Vec<String>,
    fail_push_registration: bool,
    image_counter: u32,
    users: Vec<MockUser>,
}

#[derive(Clone)]
struct MockUser {
    user_id: String,
    name: String,
    email: String,
    password: String,
}

/// テスト用のモックTransport
///
/// Story APIの小さな偽サーバーとして振る舞う。
/// `push_response` で積んだレスポンスがあればそちらを優先する。
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                online: true,
                ..MockState::default()
            })),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().unwrap().online = online;
    }

    /// 次のリクエストに返すレスポンスを積む
    pub fn push_response(&self, response: HttpResponse) {
        self.state.lock().unwrap().scripted.push_back(response);
    }

    pub fn expire_token(&self, token: &str) {
        self.state.lock().unwrap().expired_tokens.insert(token.to_string());
    }

    /// 次の投稿はサーバーに保存されるが、レスポンスは失われる
    pub fn lose_next_response(&self) {
        self.state.lock().unwrap().lose_next_response = true;
    }

    pub fn fail_push_registration(&self, fail: bool) {
        self.state.lock().unwrap().fail_push_registration = fail;
    }

    pub fn add_story(&self, story: Story) {
        self.state.lock().unwrap().stories.push(story);
    }

    pub fn stories(&self) -> Vec<Story> {
        self.state.lock().unwrap().stories.clone()
    }

    pub fn push_registrations(&self) -> Vec<String> {
        self.state.lock().unwrap().push_registrations.clone()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// 指定パスを含むURLへのリクエスト数
    pub fn request_count(&self, method: Method, url_fragment: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.contains(url_fragment))
            .count()
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if !state.online {
            return Err(CoreError::Connectivity("network unreachable".to_string()));
        }
        if let Some(response) = state.scripted.pop_front() {
            return Ok(response);
        }

        let token = request
            .header_value("Authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.to_string());
        if let Some(token) = &token {
            if state.expired_tokens.contains(token) {
                return Ok(HttpResponse::json(
                    401,
                    &json!({"error": true, "message": "Token expired"}),
                ));
            }
        }

        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| rest[i..].to_string()))
            .unwrap_or_else(|| request.url.clone());
        let path = path.split('?').next().unwrap_or("").to_string();

        match (request.method, path.as_str()) {
            (Method::Post, p) if p.ends_with("/v1/stories") => {
                let response = create_story(&mut state, &request);
                if response.is_success() && state.lose_next_response {
                    state.lose_next_response = false;
                    return Err(CoreError::Connectivity("connection reset".to_string()));
                }
                Ok(response)
            }
            (Method::Get, p) if p.ends_with("/v1/stories") => Ok(HttpResponse::json(
                200,
                &json!({"error": false, "message": "Stories fetched successfully", "listStory": state.stories}),
            )),
            (Method::Get, p) if p.contains("/v1/stories/") => {
                let id = p.rsplit('/').next().unwrap_or("");
                match state.stories.iter().find(|s| s.id == id) {
                    Some(story) => Ok(HttpResponse::json(
                        200,
                        &json!({"error": false, "message": "Story fetched successfully", "story": story}),
                    )),
                    None => Ok(HttpResponse::json(
                        404,
                        &json!({"error": true, "message": "Story not found"}),
                    )),
                }
            }
            (Method::Post, p) if p.ends_with("/v1/register") => Ok(register_user(&mut state, &request)),
            (Method::Post, p) if p.ends_with("/v1/login") => {
                let email = json_field(&request, "email");
                let password = json_field(&request, "password");
                match state.users.iter().find(|u| u.email == email) {
                    Some(user) if user.password == password => Ok(HttpResponse::json(
                        200,
                        &json!({
                            "error": false,
                            "message": "success",
                            "loginResult": {
                                "userId": user.user_id,
                                "name": user.name,
                                "token": format!("token-{}", user.user_id),
                            }
                        }),
                    )),
                    Some(_) => Ok(HttpResponse::json(
                        401,
                        &json!({"error": true, "message": "Invalid password"}),
                    )),
                    None => Ok(HttpResponse::json(
                        401,
                        &json!({"error": true, "message": "User not found"}),
                    )),
                }
            }
            (Method::Post, p) if p.ends_with("/notifications/subscribe") => {
                if state.fail_push_registration {
                    return Ok(HttpResponse::json(
                        500,
                        &json!({"error": true, "message": "Internal Server Error"}),
                    ));
                }
                let endpoint = json_field(&request, "endpoint");
                state.push_registrations.push(endpoint);
                Ok(HttpResponse::json(
                    200,
                    &json!({"error": false, "message": "Success to subscribe web push notification."}),
                ))
            }
            (Method::Delete, p) if p.ends_with("/notifications/subscribe") => {
                let endpoint = json_field(&request, "endpoint");
                state.push_registrations.retain(|e| e != &endpoint);
                Ok(HttpResponse::json(
                    200,
                    &json!({"error": false, "message": "Success to unsubscribe web push notification."}),
                ))
            }
            (Method::Get, _) => {
                // 画像などの静的リソース
                state.image_counter += 1;
                Ok(HttpResponse::new(200, format!("bytes-{}", state.image_counter))
                    .with_header("Content-Type", "image/jpeg"))
            }
            _ => Ok(HttpResponse::json(
                404,
                &json!({"error": true, "message": "Not found"}),
            )),
        }
    }
}

fn create_story(state: &mut MockState, request: &HttpRequest) -> HttpResponse {
    if request.header_value("Authorization").is_none() {
        return HttpResponse::json(401, &json!({"error": true, "message": "Missing authentication"}));
    }

    let parts = match &request.body {
        HttpBody::Multipart(parts) => parts,
        _ => {
            return HttpResponse::json(
                400,
                &json!({"error": true, "message": "\"photo\" is required"}),
            )
        }
    };

    let text = |field: &str| {
        parts.iter().find_map(|p| match p {
            FormPart::Text { name, value } if name == field => Some(value.clone()),
            _ => None,
        })
    };
    let has_photo = parts
        .iter()
        .any(|p| matches!(p, FormPart::File { name, .. } if name == "photo"));

    let description = match text("description") {
        Some(d) if !d.trim().is_empty() => d,
        _ => {
            return HttpResponse::json(
                400,
                &json!({"error": true, "message": "\"description\" is not allowed to be empty"}),
            )
        }
    };
    if !has_photo {
        return HttpResponse::json(400, &json!({"error": true, "message": "\"photo\" is required"}));
    }

    let id = format!("story-{}", state.stories.len() + 1);
    state.stories.push(Story {
        id: id.clone(),
        name: "tester".to_string(),
        description,
        photo_url: format!("https://story-api.dicoding.dev/images/stories/{}.jpg", id),
        created_at: "2024-01-01T00:00:00.000Z".to_string(),
        lat: text("lat").and_then(|v| v.parse().ok()),
        lon: text("lon").and_then(|v| v.parse().ok()),
    });

    HttpResponse::json(201, &json!({"error": false, "message": "success"}))
}

fn register_user(state: &mut MockState, request: &HttpRequest) -> HttpResponse {
    let name = json_field(request, "name");
    let email = json_field(request, "email");
    let password = json_field(request, "password");

    if name.is_empty() || email.is_empty() {
        return HttpResponse::json(400, &json!({"error": true, "message": "\"name\" is required"}));
    }
    if password.len() < 8 {
        return HttpResponse::json(
            400,
            &json!({"error": true, "message": "Password must be at least 8 characters long"}),
        );
    }
    if state.users.iter().any(|u| u.email == email) {
        return HttpResponse::json(400, &json!({"error": true, "message": "Email is already taken"}));
    }

    state.users.push(MockUser {
        user_id: format!("user-{}", state.users.len() + 1),
        name,
        email,
        password,
    });
    HttpResponse::json(201, &json!({"error": false, "message": "User Created"}))
}

fn json_field(request: &HttpRequest, field: &str) -> String {
    match &request.body {
        HttpBody::Json(body) => serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v[field].as_str().map(|s| s.to_string()))
            .unwrap_or_default(),
        _ => String::new(),
    }
}
