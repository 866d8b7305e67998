use async_trait::async_trait;
use js_sys::{Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Notification, NotificationPermission, PushManager, PushSubscription, PushSubscriptionOptionsInit};

use crate::error::{CoreError, Result};
use crate::push::{Permission, PushPlatform};
use crate::types::PushSubscriptionState;
use crate::web;

/// Push API + Notification API
#[derive(Debug, Clone, Copy, Default)]
pub struct WebPushPlatform;

impl WebPushPlatform {
    async fn push_manager(&self) -> Result<PushManager> {
        let registration = web::current_registration().await?;
        Ok(registration.push_manager()?)
    }

    async fn local_subscription(&self) -> Result<Option<PushSubscription>> {
        let promise = self.push_manager().await?.get_subscription()?;
        let value = JsFuture::from(promise).await?;
        if value.is_null() || value.is_undefined() {
            return Ok(None);
        }
        Ok(Some(value.dyn_into()?))
    }
}

/// `toJSON()` の形 `{endpoint, keys: {p256dh, auth}}` から読む
fn subscription_state(subscription: &PushSubscription) -> Result<PushSubscriptionState> {
    let json = web::js_to_json(subscription)?;
    Ok(serde_json::from_str(&json)?)
}

fn parse_permission(value: &str) -> Permission {
    match value {
        "granted" => Permission::Granted,
        "denied" => Permission::Denied,
        _ => Permission::Default,
    }
}

#[async_trait(?Send)]
impl PushPlatform for WebPushPlatform {
    fn is_supported(&self) -> bool {
        let Some(window) = web_sys::window() else {
            return false;
        };
        let has = |target: &JsValue, name: &str| Reflect::has(target, &JsValue::from_str(name)).unwrap_or(false);
        has(&window, "Notification") && has(&window, "PushManager") && has(&window.navigator(), "serviceWorker")
    }

    fn permission(&self) -> Permission {
        match Notification::permission() {
            NotificationPermission::Granted => Permission::Granted,
            NotificationPermission::Denied => Permission::Denied,
            _ => Permission::Default,
        }
    }

    async fn request_permission(&self) -> Result<Permission> {
        let answer = JsFuture::from(Notification::request_permission()?).await?;
        let answer = answer.as_string().unwrap_or_default();
        log::info!("Notification permission answered: {}", answer);
        Ok(parse_permission(&answer))
    }

    async fn current_subscription(&self) -> Result<Option<PushSubscriptionState>> {
        match self.local_subscription().await? {
            Some(subscription) => Ok(Some(subscription_state(&subscription)?)),
            None => Ok(None),
        }
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscriptionState> {
        let options = js_sys::Object::new();
        Reflect::set(&options, &JsValue::from_str("userVisibleOnly"), &JsValue::TRUE)?;
        Reflect::set(
            &options,
            &JsValue::from_str("applicationServerKey"),
            &Uint8Array::from(application_server_key),
        )?;
        let options: PushSubscriptionOptionsInit = options.unchecked_into();

        let promise = self.push_manager().await?.subscribe_with_options(&options)?;
        let subscription: PushSubscription = JsFuture::from(promise)
            .await
            .map_err(|e| CoreError::PushError(web::js_error_message(&e)))?
            .dyn_into()?;

        log::info!("Push subscription created: {}", subscription.endpoint());
        subscription_state(&subscription)
    }

    async fn unsubscribe(&self) -> Result<bool> {
        let Some(subscription) = self.local_subscription().await? else {
            return Ok(false);
        };
        let removed = JsFuture::from(subscription.unsubscribe()?).await?;
        Ok(removed.as_bool().unwrap_or(false))
    }
}
