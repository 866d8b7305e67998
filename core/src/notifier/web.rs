use async_trait::async_trait;
use js_sys::{Array, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    Client, ClientQueryOptions, ClientType, Notification, NotificationOptions, ServiceWorkerGlobalScope, Url,
    WindowClient,
};

use crate::error::{CoreError, Result};
use crate::notifier::{LocalNotification, Notifier, SyncMessage};
use crate::web;

fn notification_options(notification: &LocalNotification) -> Result<NotificationOptions> {
    let options = NotificationOptions::new();
    options.set_body(&notification.body);
    options.set_icon(&notification.icon);
    options.set_badge(&notification.badge);
    options.set_tag(&notification.tag);

    let data = js_sys::Object::new();
    Reflect::set(&data, &JsValue::from_str("url"), &JsValue::from_str(&notification.url))?;
    Reflect::set(&data, &JsValue::from_str("dateOfArrival"), &JsValue::from_f64(js_sys::Date::now()))?;
    options.set_data(&data);

    if !notification.actions.is_empty() {
        let actions = Array::new();
        for action in &notification.actions {
            let item = js_sys::Object::new();
            Reflect::set(&item, &JsValue::from_str("action"), &JsValue::from_str(&action.action))?;
            Reflect::set(&item, &JsValue::from_str("title"), &JsValue::from_str(&action.title))?;
            actions.push(&item);
        }
        Reflect::set(&options, &JsValue::from_str("actions"), &actions)?;
    }

    Ok(options)
}

/// Service Worker側のNotifier
pub struct ServiceWorkerNotifier {
    scope: ServiceWorkerGlobalScope,
}

impl ServiceWorkerNotifier {
    pub fn new(scope: ServiceWorkerGlobalScope) -> Self {
        Self { scope }
    }

    /// 制御外も含めた全ウィンドウクライアント
    async fn window_clients(&self) -> Result<Vec<Client>> {
        let options = ClientQueryOptions::new();
        options.set_include_uncontrolled(true);
        options.set_type(ClientType::Window);

        let found = JsFuture::from(self.scope.clients().match_all_with_options(&options)).await?;
        let found: Array = found.dyn_into()?;
        Ok(found.iter().filter_map(|c| c.dyn_into::<Client>().ok()).collect())
    }

    /// 同一オリジンのウィンドウをフォーカス、なければ開く
    async fn open_or_focus(&self, url: &str) -> Result<()> {
        let origin = self.scope.location().origin();
        let target = Url::new_with_base(url, &origin)?;

        for client in self.window_clients().await? {
            let same_origin = Url::new(&client.url())
                .map(|u| u.origin() == target.origin())
                .unwrap_or(false);
            if !same_origin {
                continue;
            }
            if let Ok(window) = client.dyn_into::<WindowClient>() {
                JsFuture::from(window.focus()?).await?;
                JsFuture::from(window.navigate(&target.href())?).await?;
                return Ok(());
            }
        }

        JsFuture::from(self.scope.clients().open_window(&target.href())).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl Notifier for ServiceWorkerNotifier {
    async fn broadcast(&self, message: &SyncMessage) -> Result<usize> {
        let payload = web::json_to_js(&message.to_json())?;
        let clients = self.window_clients().await?;
        for client in &clients {
            client.post_message(&payload)?;
        }
        log::debug!("Broadcast {:?} to {} client(s)", message, clients.len());
        Ok(clients.len())
    }

    async fn show(&self, notification: &LocalNotification) -> Result<()> {
        let options = notification_options(notification)?;
        let promise = self
            .scope
            .registration()
            .show_notification_with_options(&notification.title, &options)?;
        JsFuture::from(promise).await?;
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<()> {
        self.open_or_focus(url).await
    }
}

/// ウィンドウ側のNotifier
///
/// broadcastは制御中のService Workerへの送信になる。
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowNotifier;

#[async_trait(?Send)]
impl Notifier for WindowNotifier {
    async fn broadcast(&self, message: &SyncMessage) -> Result<usize> {
        let payload = web::json_to_js(&message.to_json())?;
        Ok(if web::post_to_controller(&payload)? { 1 } else { 0 })
    }

    async fn show(&self, notification: &LocalNotification) -> Result<()> {
        let options = notification_options(notification)?;
        Notification::new_with_options(&notification.title, &options)
            .map_err(|e| CoreError::JsError(web::js_error_message(&e)))?;
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<()> {
        let window = web_sys::window().ok_or_else(|| CoreError::Other("No window".to_string()))?;
        window.open_with_url_and_target(url, "_self")?;
        Ok(())
    }
}
