use std::sync::Arc;

use tokio::sync::Mutex;

use crate::api::StoryApi;
use crate::cache::{CacheStrategyLayer, OpaqueBodyStore, Served};
use crate::config::AppConfig;
use crate::error::Result;
use crate::notifier::{ClickAction, LocalNotification, Notifier, SyncMessage};
use crate::outbox::{OutboxQueue, SyncScheduler};
use crate::replay::{QueueReplayAgent, ReplayReport};
use crate::storage::Storage;
use crate::transport::{HttpRequest, Method, Transport};

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".avif"];

/// fetchイベントの振り分け先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRoute {
    /// ストーリー一覧・詳細（stale-while-revalidate）
    StoryRead,
    /// 画像（cache-first）
    Image,
    /// 投稿（ネットワークへ、失敗時は同期を要求）
    Submission,
    /// 横取りしない
    Passthrough,
}

/// Service Workerのイベント
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundEvent {
    Fetch { request: HttpRequest, route: FetchRoute },
    Sync { tag: String },
    Push { data: Option<String> },
    NotificationClick { action: String, url: Option<String> },
    Message(SyncMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundOutcome {
    /// fetchへの応答
    Respond(Served),
    Replayed(ReplayReport),
    Notified(LocalNotification),
    Clicked(ClickAction),
    Ignored,
}

/// Service Worker側のサービス一式
///
/// リスナーはすべてこのハンドル1つに振り分ける。
pub struct WorkerHandle {
    api: Arc<StoryApi>,
    transport: Arc<dyn Transport>,
    cache: CacheStrategyLayer,
    agent: QueueReplayAgent,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn SyncScheduler>,
    notification_icon: String,
    /// 再送パスは同時に1つだけ
    replay_lock: Mutex<()>,
}

impl WorkerHandle {
    pub fn new(
        config: &AppConfig,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<dyn SyncScheduler>,
    ) -> Self {
        let api = Arc::new(StoryApi::new(transport.clone(), config.base_url.clone()));
        let outbox = Arc::new(OutboxQueue::new(storage.clone()));
        let cache = CacheStrategyLayer::new(
            transport.clone(),
            storage,
            config.story_cache,
            config.image_cache,
        );
        let agent = QueueReplayAgent::new(outbox, api.clone(), notifier.clone(), config.replay.clone());

        Self {
            api,
            transport,
            cache,
            agent,
            notifier,
            scheduler,
            notification_icon: config.notification_icon.clone(),
            replay_lock: Mutex::new(()),
        }
    }

    /// 画像キャッシュのopaque本体の置き場所を設定する
    pub fn with_opaque_bodies(mut self, store: Arc<dyn OpaqueBodyStore>) -> Self {
        self.cache = self.cache.with_opaque_bodies(store);
        self
    }

    pub fn cache(&self) -> &CacheStrategyLayer {
        &self.cache
    }

    /// fetchイベントの振り分け
    ///
    /// `respondWith` は同期的に呼ぶ必要があるので、メソッドとURLだけで決める。
    pub fn route(&self, method: &str, url: &str, is_image: bool) -> FetchRoute {
        let Some(method) = Method::parse(method) else {
            return FetchRoute::Passthrough;
        };
        if self.api.is_submission(method, url) {
            FetchRoute::Submission
        } else if self.api.is_story_read(method, url) {
            FetchRoute::StoryRead
        } else if method == Method::Get && (is_image || has_image_extension(url)) {
            FetchRoute::Image
        } else {
            FetchRoute::Passthrough
        }
    }

    pub async fn dispatch(&self, event: BackgroundEvent) -> Result<BackgroundOutcome> {
        match event {
            BackgroundEvent::Fetch { request, route } => self.fetch(request, route).await,
            BackgroundEvent::Sync { tag } => {
                if tag != self.agent.policy().sync_tag {
                    log::debug!("Ignoring sync tag {}", tag);
                    return Ok(BackgroundOutcome::Ignored);
                }
                // 一時的な失敗はそのまま返し、プラットフォームに再スケジュールさせる
                let _guard = self.replay_lock.lock().await;
                Ok(BackgroundOutcome::Replayed(self.agent.replay().await?))
            }
            BackgroundEvent::Message(SyncMessage::ReplayOutbox) => {
                let report = {
                    let _guard = self.replay_lock.lock().await;
                    self.agent.run_pass().await?
                };
                if report.interrupted.is_some() {
                    self.request_sync().await;
                }
                Ok(BackgroundOutcome::Replayed(report))
            }
            BackgroundEvent::Message(other) => {
                log::debug!("Ignoring message {:?}", other);
                Ok(BackgroundOutcome::Ignored)
            }
            BackgroundEvent::Push { data } => {
                let notification = LocalNotification::from_push_payload(data.as_deref(), &self.notification_icon);
                self.notifier.show(&notification).await?;
                Ok(BackgroundOutcome::Notified(notification))
            }
            BackgroundEvent::NotificationClick { action, url } => {
                let click = ClickAction::from_click(&action, url.as_deref());
                if let ClickAction::Open(url) = &click {
                    self.notifier.open(url).await?;
                }
                Ok(BackgroundOutcome::Clicked(click))
            }
        }
    }

    /// stale-while-revalidateのヒット後に呼ぶ
    pub async fn revalidate(&self, request: &HttpRequest) {
        self.cache.revalidate(request).await;
    }

    async fn fetch(&self, request: HttpRequest, route: FetchRoute) -> Result<BackgroundOutcome> {
        let served = match route {
            FetchRoute::StoryRead => self.cache.stale_while_revalidate(&request).await?,
            FetchRoute::Image => self.cache.cache_first(&request).await?,
            FetchRoute::Submission => {
                // 保存はページ側が行う。ここでは接続が戻ったときに起こしてもらうだけ
                let response = match self.transport.send(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        self.request_sync().await;
                        return Err(e);
                    }
                };
                Served {
                    response,
                    from_cache: false,
                    revalidate: false,
                }
            }
            FetchRoute::Passthrough => return Ok(BackgroundOutcome::Ignored),
        };
        Ok(BackgroundOutcome::Respond(served))
    }

    async fn request_sync(&self) {
        if let Err(e) = self.scheduler.request_sync(&self.agent.policy().sync_tag).await {
            log::warn!("Failed to register background sync: {}", e);
        }
    }
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
