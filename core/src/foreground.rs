use std::sync::Arc;

use crate::api::StoryApi;
use crate::config::AppConfig;
use crate::library::StoryLibrary;
use crate::notifier::{LocalNotification, Notifier, SyncMessage};
use crate::outbox::{OutboxQueue, SyncScheduler};
use crate::push::{Permission, PushPlatform, PushSubscriptionManager, SubscriptionStatus};
use crate::session::CredentialStore;
use crate::storage::Storage;
use crate::submission::{SubmissionCoordinator, SubmissionOutcome};
use crate::transport::Transport;
use crate::error::Result;
use crate::types::{AuthUser, Story, StoryPayload};

/// ウィンドウ側のイベント
#[derive(Debug, Clone, PartialEq)]
pub enum ForegroundEvent {
    /// Service Workerからのメッセージ
    Message(SyncMessage),
    /// `online` イベント
    Online,
    /// ページ読み込み
    Load,
}

/// イベント処理の結果としてビューが反映すべき変化
#[derive(Debug, Clone, PartialEq)]
pub enum ForegroundEffect {
    /// 送信待ち表示を消す（idが無ければすべて）
    ClearPendingIndicator { id: Option<String> },
    SystemNotification(LocalNotification),
    Toast { title: String, text: String },
    /// Service Workerに再送を依頼した
    ReplayRequested,
    PendingCount(usize),
    PushStatus(SubscriptionStatus),
}

/// ウィンドウ側のサービス一式
///
/// ページごとに一度だけ組み立てて共有する。
pub struct ForegroundHandle {
    api: Arc<StoryApi>,
    outbox: Arc<OutboxQueue>,
    coordinator: SubmissionCoordinator,
    library: StoryLibrary,
    push: PushSubscriptionManager,
    platform: Arc<dyn PushPlatform>,
    notifier: Arc<dyn Notifier>,
    credentials: Arc<dyn CredentialStore>,
    notification_icon: String,
}

impl ForegroundHandle {
    pub fn new(
        config: &AppConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        scheduler: Arc<dyn SyncScheduler>,
        platform: Arc<dyn PushPlatform>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let api = Arc::new(StoryApi::new(transport, config.base_url.clone()));
        let outbox = Arc::new(OutboxQueue::new(storage.clone()));
        let coordinator = SubmissionCoordinator::new(
            api.clone(),
            outbox.clone(),
            credentials.clone(),
            scheduler,
            config.replay.sync_tag.clone(),
        );
        let push = PushSubscriptionManager::new(
            platform.clone(),
            api.clone(),
            storage.clone(),
            credentials.clone(),
            config.vapid_public_key.clone(),
        );

        Self {
            api,
            outbox,
            coordinator,
            library: StoryLibrary::new(storage),
            push,
            platform,
            notifier,
            credentials,
            notification_icon: config.notification_icon.clone(),
        }
    }

    pub fn api(&self) -> &StoryApi {
        &self.api
    }

    pub fn library(&self) -> &StoryLibrary {
        &self.library
    }

    pub fn push(&self) -> &PushSubscriptionManager {
        &self.push
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<String> {
        self.api.register(name, email, password).await
    }

    /// サインインして認証情報を保存する
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthUser> {
        let result = self.api.login(email, password).await?;
        self.credentials.save_login(&result)?;
        log::info!("Signed in as {}", result.name);
        Ok(result.user())
    }

    pub fn logout(&self) {
        self.credentials.clear();
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.credentials.user()
    }

    /// サインイン中のユーザーの投稿（未サインインなら空）
    pub async fn my_stories(&self, stories: Vec<Story>) -> Result<Vec<Story>> {
        match self.current_user() {
            Some(user) => self.library.my_stories(stories, &user.name).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn submit(&self, payload: StoryPayload) -> SubmissionOutcome {
        self.coordinator.submit(payload).await
    }

    /// 送信待ちの件数（ストアが使えなければ0）
    pub async fn pending_count(&self) -> usize {
        self.outbox.len().await.unwrap_or_else(|e| {
            log::warn!("Cannot read outbox: {}", e);
            0
        })
    }

    pub async fn dispatch(&self, event: ForegroundEvent) -> Vec<ForegroundEffect> {
        match event {
            ForegroundEvent::Message(SyncMessage::SyncSuccess { id }) => {
                let mut effects = vec![ForegroundEffect::ClearPendingIndicator { id }];
                effects.push(self.confirm_upload().await);
                effects.push(ForegroundEffect::PendingCount(self.pending_count().await));
                effects
            }
            ForegroundEvent::Message(SyncMessage::SyncFailed { id, reason }) => vec![
                ForegroundEffect::ClearPendingIndicator { id: Some(id) },
                ForegroundEffect::Toast {
                    title: "Story could not be uploaded".to_string(),
                    text: reason,
                },
                ForegroundEffect::PendingCount(self.pending_count().await),
            ],
            ForegroundEvent::Message(SyncMessage::ReplayOutbox) => Vec::new(),
            ForegroundEvent::Online => {
                if self.pending_count().await == 0 {
                    return Vec::new();
                }
                match self.notifier.broadcast(&SyncMessage::ReplayOutbox).await {
                    Ok(0) => {
                        log::info!("No active service worker to replay the outbox");
                        Vec::new()
                    }
                    Ok(_) => vec![ForegroundEffect::ReplayRequested],
                    Err(e) => {
                        log::warn!("Failed to request replay: {}", e);
                        Vec::new()
                    }
                }
            }
            ForegroundEvent::Load => {
                let status = match self.push.restore().await {
                    Ok(status) => status,
                    Err(e) => {
                        log::warn!("Failed to restore push subscription: {}", e);
                        SubscriptionStatus::Unsubscribed
                    }
                };
                vec![
                    ForegroundEffect::PendingCount(self.pending_count().await),
                    ForegroundEffect::PushStatus(status),
                ]
            }
        }
    }

    /// 許可があればシステム通知、なければページ内トースト
    async fn confirm_upload(&self) -> ForegroundEffect {
        let notification = LocalNotification::sync_success(&self.notification_icon);
        if self.platform.permission() == Permission::Granted {
            match self.notifier.show(&notification).await {
                Ok(()) => return ForegroundEffect::SystemNotification(notification),
                Err(e) => log::warn!("Failed to show notification: {}", e),
            }
        }
        ForegroundEffect::Toast {
            title: notification.title,
            text: notification.body,
        }
    }
}
