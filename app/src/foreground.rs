use std::rc::Rc;

use serde_json::{json, Value};
use storyshare_core::foreground::{ForegroundEffect, ForegroundEvent, ForegroundHandle};
use storyshare_core::notifier::web::WindowNotifier;
use storyshare_core::notifier::SyncMessage;
use storyshare_core::outbox::BackgroundSyncScheduler;
use storyshare_core::push::web::WebPushPlatform;
use storyshare_core::push::SubscriptionStatus;
use storyshare_core::session::LocalStorageCredentials;
use storyshare_core::storage::indexeddb::LazyIndexedDbStorage;
use storyshare_core::submission::{Route, SubmissionOutcome};
use storyshare_core::transport::fetch::FetchTransport;
use storyshare_core::types::{GeoPoint, Photo, Story, StoryPayload};
use storyshare_core::{web, CoreError};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::MessageEvent;

use crate::config::load_window_config;

fn route_name(route: Route) -> &'static str {
    match route {
        Route::Home => "#/",
        Route::Login => "#/login",
    }
}

fn status_name(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Subscribed => "subscribed",
        SubscriptionStatus::Unsubscribed => "unsubscribed",
    }
}

fn outcome_to_json(outcome: &SubmissionOutcome) -> Value {
    let (status, id) = match outcome {
        SubmissionOutcome::Delivered { .. } => ("delivered", None),
        SubmissionOutcome::Deferred { id } => ("deferred", Some(id.clone())),
        SubmissionOutcome::Rejected { .. } => ("rejected", None),
        SubmissionOutcome::Failed { .. } => ("failed", None),
    };
    json!({
        "status": status,
        "id": id,
        "message": outcome.user_message(),
        "navigate": outcome.navigation().map(route_name),
    })
}

fn effect_to_json(effect: &ForegroundEffect) -> Value {
    match effect {
        ForegroundEffect::ClearPendingIndicator { id } => json!({"type": "clearPending", "id": id}),
        ForegroundEffect::SystemNotification(n) => json!({"type": "notification", "title": n.title, "body": n.body}),
        ForegroundEffect::Toast { title, text } => json!({"type": "toast", "title": title, "text": text}),
        ForegroundEffect::ReplayRequested => json!({"type": "replayRequested"}),
        ForegroundEffect::PendingCount(count) => json!({"type": "pendingCount", "count": count}),
        ForegroundEffect::PushStatus(status) => json!({"type": "pushStatus", "status": status_name(*status)}),
    }
}

fn to_js(value: &Value) -> Result<JsValue, JsValue> {
    Ok(web::json_to_js(&value.to_string())?)
}

fn effects_to_js(effects: &[ForegroundEffect]) -> Result<JsValue, JsValue> {
    to_js(&Value::Array(effects.iter().map(effect_to_json).collect()))
}

fn parse_stories(stories: &JsValue) -> Result<Vec<Story>, JsValue> {
    let json = web::js_to_json(stories)?;
    Ok(serde_json::from_str(&json).map_err(CoreError::from)?)
}

/// ウィンドウ側のエントリポイント
///
/// メソッドはすべてPromiseを返す。
#[wasm_bindgen]
pub struct StoryShareApp {
    handle: Rc<ForegroundHandle>,
}

#[wasm_bindgen]
impl StoryShareApp {
    #[wasm_bindgen(constructor)]
    pub fn new() -> StoryShareApp {
        let config = load_window_config();
        let handle = ForegroundHandle::new(
            &config,
            std::sync::Arc::new(LazyIndexedDbStorage::new()),
            std::sync::Arc::new(FetchTransport::new()),
            std::sync::Arc::new(LocalStorageCredentials),
            std::sync::Arc::new(BackgroundSyncScheduler),
            std::sync::Arc::new(WebPushPlatform),
            std::sync::Arc::new(WindowNotifier),
        );
        log::info!("StoryShare page services ready ({})", config.base_url);
        StoryShareApp {
            handle: Rc::new(handle),
        }
    }

    /// 投稿。結果は `{status, id, message, navigate}`
    pub fn submit(
        &self,
        description: String,
        photo: Vec<u8>,
        file_name: String,
        mime_type: String,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> js_sys::Promise {
        let handle = self.handle.clone();
        let location = match (lat, lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        };
        let payload = StoryPayload {
            description,
            photo: Photo {
                file_name,
                mime_type,
                bytes: photo,
            },
            location,
        };

        future_to_promise(async move {
            let outcome = handle.submit(payload).await;
            to_js(&outcome_to_json(&outcome))
        })
    }

    /// ページ読み込み時の処理
    pub fn load(&self) -> js_sys::Promise {
        self.dispatch(ForegroundEvent::Load)
    }

    /// onlineイベントとService Workerからのメッセージを購読する
    ///
    /// `on_effects` には処理結果の配列が渡される。
    pub fn listen(&self, on_effects: js_sys::Function) -> Result<(), JsValue> {
        let window = web_sys::window().ok_or("No window")?;

        {
            let handle = self.handle.clone();
            let on_effects = on_effects.clone();
            let on_online = Closure::wrap(Box::new(move || {
                log::info!("Connectivity restored");
                spawn_dispatch(handle.clone(), ForegroundEvent::Online, on_effects.clone());
            }) as Box<dyn FnMut()>);
            window.add_event_listener_with_callback("online", on_online.as_ref().unchecked_ref())?;
            on_online.forget();
        }

        {
            let handle = self.handle.clone();
            let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
                let message = web::js_to_json(&event.data()).and_then(|json| SyncMessage::from_json(&json));
                match message {
                    Ok(message) => {
                        spawn_dispatch(handle.clone(), ForegroundEvent::Message(message), on_effects.clone())
                    }
                    Err(e) => log::warn!("Ignoring service worker message: {}", e),
                }
            }) as Box<dyn FnMut(MessageEvent)>);
            window
                .navigator()
                .service_worker()
                .add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
            on_message.forget();
        }

        Ok(())
    }

    /// 通知の有効・無効を切り替え、新しい状態を返す
    pub fn toggle_notifications(&self) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let status = handle.push().toggle().await?;
            Ok(JsValue::from_str(status_name(status)))
        })
    }

    pub fn pending_count(&self) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move { Ok(JsValue::from_f64(handle.pending_count().await as f64)) })
    }

    /// 非表示を除いた一覧
    pub fn visible_stories(&self, stories: JsValue) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let stories = parse_stories(&stories)?;
            let visible = handle.library().visible(stories).await?;
            to_js(&serde_json::to_value(&visible).map_err(CoreError::from)?)
        })
    }

    /// 自分の投稿だけ
    pub fn my_stories(&self, stories: JsValue) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let stories = parse_stories(&stories)?;
            let mine = handle.my_stories(stories).await?;
            to_js(&serde_json::to_value(&mine).map_err(CoreError::from)?)
        })
    }

    pub fn register(&self, name: String, email: String, password: String) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let message = handle.register(&name, &email, &password).await?;
            Ok(JsValue::from_str(&message))
        })
    }

    /// サインイン。成功時は `{userId, name}`
    pub fn login(&self, email: String, password: String) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let user = handle.login(&email, &password).await?;
            to_js(&serde_json::to_value(&user).map_err(CoreError::from)?)
        })
    }

    pub fn logout(&self) {
        self.handle.logout();
    }

    pub fn favorites(&self) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let favorites = handle.library().visible_favorites().await?;
            to_js(&serde_json::to_value(&favorites).map_err(CoreError::from)?)
        })
    }

    /// お気に入りの切り替え。切り替え後にお気に入りならtrue
    pub fn toggle_favorite(&self, story: JsValue) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let json = web::js_to_json(&story)?;
            let story: Story = serde_json::from_str(&json).map_err(CoreError::from)?;
            let favorite = handle.library().toggle_favorite(&story).await?;
            Ok(JsValue::from_bool(favorite))
        })
    }

    pub fn hide(&self, id: String) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            handle.library().hide(&id).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn unhide(&self, id: String) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            handle.library().unhide(&id).await?;
            Ok(JsValue::UNDEFINED)
        })
    }
}

impl StoryShareApp {
    fn dispatch(&self, event: ForegroundEvent) -> js_sys::Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let effects = handle.dispatch(event).await;
            effects_to_js(&effects)
        })
    }
}

impl Default for StoryShareApp {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_dispatch(handle: Rc<ForegroundHandle>, event: ForegroundEvent, on_effects: js_sys::Function) {
    wasm_bindgen_futures::spawn_local(async move {
        let effects = handle.dispatch(event).await;
        match effects_to_js(&effects) {
            Ok(value) => {
                if let Err(e) = on_effects.call1(&JsValue::NULL, &value) {
                    log::error!("Effect callback failed: {}", web::js_error_message(&e));
                }
            }
            Err(e) => log::error!("Failed to encode effects: {}", web::js_error_message(&e)),
        }
    });
}
