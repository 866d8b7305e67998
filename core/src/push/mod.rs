pub mod mock;
pub mod web;

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::Mutex;

use crate::api::StoryApi;
use crate::error::{CoreError, Result};
use crate::session::CredentialStore;
use crate::storage::Storage;
use crate::types::{PushSubscriptionState, PUSH_STATE_KEY};

/// 通知の許可状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// まだ尋ねていない（プロンプトを閉じた場合も含む）
    Default,
}

/// ブラウザのPush機能
#[async_trait(?Send)]
pub trait PushPlatform {
    fn is_supported(&self) -> bool;

    fn permission(&self) -> Permission;

    /// 許可プロンプトを表示
    async fn request_permission(&self) -> Result<Permission>;

    /// 既存のローカル購読
    async fn current_subscription(&self) -> Result<Option<PushSubscriptionState>>;

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscriptionState>;

    /// ローカル購読を解除。購読が無ければ `false`
    async fn unsubscribe(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Unsubscribed,
    Subscribed,
}

#[derive(Debug)]
struct ManagerState {
    status: SubscriptionStatus,
    /// このセッションで許可が拒否された
    denied: bool,
}

/// Push購読の管理
///
/// `Unsubscribed → Subscribed → Unsubscribed` の状態機械。
/// 操作はMutexで直列化され、トグルの連打で二重購読にならない。
pub struct PushSubscriptionManager {
    platform: Arc<dyn PushPlatform>,
    api: Arc<StoryApi>,
    storage: Arc<dyn Storage>,
    credentials: Arc<dyn CredentialStore>,
    vapid_public_key: String,
    state: Mutex<ManagerState>,
}

impl PushSubscriptionManager {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        api: Arc<StoryApi>,
        storage: Arc<dyn Storage>,
        credentials: Arc<dyn CredentialStore>,
        vapid_public_key: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            api,
            storage,
            credentials,
            vapid_public_key: vapid_public_key.into(),
            state: Mutex::new(ManagerState {
                status: SubscriptionStatus::Unsubscribed,
                denied: false,
            }),
        }
    }

    pub async fn status(&self) -> SubscriptionStatus {
        self.state.lock().await.status
    }

    /// 起動時に保存済みの状態とブラウザの購読を突き合わせる
    pub async fn restore(&self) -> Result<SubscriptionStatus> {
        let mut state = self.state.lock().await;
        if !self.platform.is_supported() {
            state.status = SubscriptionStatus::Unsubscribed;
            return Ok(state.status);
        }
        if self.platform.permission() == Permission::Denied {
            state.denied = true;
        }

        let stored: Option<PushSubscriptionState> = self.storage.get_record(PUSH_STATE_KEY).await?;
        let local = self.platform.current_subscription().await?;

        state.status = match (local, stored) {
            (Some(local), Some(stored)) if stored.enabled && stored.endpoint == local.endpoint => {
                SubscriptionStatus::Subscribed
            }
            (None, Some(_)) => {
                // ブラウザ側で購読が消えている
                self.storage.delete_record::<PushSubscriptionState>(PUSH_STATE_KEY).await?;
                SubscriptionStatus::Unsubscribed
            }
            _ => SubscriptionStatus::Unsubscribed,
        };

        log::info!("Push subscription restored: {:?}", state.status);
        Ok(state.status)
    }

    /// 通知を有効化
    pub async fn enable(&self) -> Result<SubscriptionStatus> {
        let mut state = self.state.lock().await;
        if state.status == SubscriptionStatus::Subscribed {
            return Ok(state.status);
        }
        if state.denied {
            return Err(CoreError::PermissionDenied);
        }
        if !self.platform.is_supported() {
            return Err(CoreError::PushError(
                "Push notifications are not supported in this browser".to_string(),
            ));
        }
        let token = self
            .credentials
            .token()
            .ok_or_else(|| CoreError::Auth("Sign in to enable notifications".to_string()))?;

        let permission = match self.platform.permission() {
            Permission::Default => self.platform.request_permission().await?,
            granted_or_denied => granted_or_denied,
        };
        if permission != Permission::Granted {
            state.denied = true;
            log::warn!("Notification permission not granted: {:?}", permission);
            return Err(CoreError::PermissionDenied);
        }

        let key = decode_vapid_key(&self.vapid_public_key)?;
        let subscription = match self.platform.current_subscription().await? {
            Some(existing) => {
                log::info!("Reusing existing push subscription");
                existing
            }
            None => self.platform.subscribe(&key).await?,
        };

        if let Err(e) = self.api.subscribe_push(&token, &subscription).await {
            log::error!("Push registration failed: {}", e);
            // サーバーが知らない購読を残さない
            if let Err(unsubscribe_err) = self.platform.unsubscribe().await {
                log::warn!("Compensating unsubscribe failed: {}", unsubscribe_err);
            }
            self.storage.delete_record::<PushSubscriptionState>(PUSH_STATE_KEY).await?;
            return Err(e);
        }

        let persisted = PushSubscriptionState {
            enabled: true,
            ..subscription
        };
        self.storage.put_record(&persisted).await?;
        state.status = SubscriptionStatus::Subscribed;

        log::info!("Push subscription enabled");
        Ok(state.status)
    }

    /// 通知を無効化
    ///
    /// サーバー側の登録解除に失敗してもローカルの購読は解除する。
    pub async fn disable(&self) -> Result<SubscriptionStatus> {
        let mut state = self.state.lock().await;

        let local = self.platform.current_subscription().await?;
        let stored: Option<PushSubscriptionState> = self.storage.get_record(PUSH_STATE_KEY).await?;
        let endpoint = local.map(|s| s.endpoint).or(stored.map(|s| s.endpoint));

        if let (Some(endpoint), Some(token)) = (endpoint, self.credentials.token()) {
            if let Err(e) = self.api.unsubscribe_push(&token, &endpoint).await {
                log::warn!("Push unregistration failed: {}", e);
            }
        }

        // ブラウザ側の解除に失敗しても無効として記録してからエラーを返す
        let unsubscribed = self.platform.unsubscribe().await;
        state.status = SubscriptionStatus::Unsubscribed;
        self.storage.delete_record::<PushSubscriptionState>(PUSH_STATE_KEY).await?;
        unsubscribed?;

        log::info!("Push subscription disabled");
        Ok(state.status)
    }

    pub async fn toggle(&self) -> Result<SubscriptionStatus> {
        match self.status().await {
            SubscriptionStatus::Subscribed => self.disable().await,
            SubscriptionStatus::Unsubscribed => self.enable().await,
        }
    }
}

/// URL-safe base64のVAPID公開鍵をバイト列にする
///
/// 非圧縮P-256点（65バイト）のみ受け付ける。
pub fn decode_vapid_key(key: &str) -> Result<Vec<u8>> {
    let key = key.trim();
    if !(85..=90).contains(&key.len()) {
        return Err(CoreError::PushError(format!(
            "Invalid VAPID key length: {}",
            key.len()
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(key.trim_end_matches('='))
        .map_err(|e| CoreError::PushError(format!("Invalid VAPID key: {}", e)))?;

    if bytes.len() != 65 || bytes[0] != 0x04 {
        return Err(CoreError::PushError(format!(
            "VAPID key is not an uncompressed P-256 point ({} bytes)",
            bytes.len()
        )));
    }
    Ok(bytes)
}
