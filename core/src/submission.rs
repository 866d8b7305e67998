use std::sync::Arc;

use crate::api::StoryApi;
use crate::error::{CoreError, Result};
use crate::outbox::{OutboxQueue, SyncScheduler};
use crate::session::CredentialStore;
use crate::types::{current_millis, EntryIdGenerator, OutboxEntry, StoryPayload};

/// 送信後の遷移先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
}

/// 投稿の結果
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// サーバーに保存された
    Delivered { message: String },
    /// Outboxに保存した。接続が戻ったら送る
    Deferred { id: String },
    /// サーバーが拒否した（認証・入力エラー）。キューには入れない
    Rejected { error: CoreError },
    /// 送信もオフライン保存もできなかった
    Failed { error: CoreError },
}

impl SubmissionOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SubmissionOutcome::Delivered { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            SubmissionOutcome::Delivered { .. } => "Story shared successfully!".to_string(),
            SubmissionOutcome::Deferred { .. } => {
                "You're offline. Your story was saved and will be uploaded automatically.".to_string()
            }
            SubmissionOutcome::Rejected {
                error: CoreError::Auth(_),
            } => "Your session has expired. Please sign in again.".to_string(),
            SubmissionOutcome::Rejected { error } => match error {
                CoreError::Validation(message) => message.clone(),
                other => other.to_string(),
            },
            SubmissionOutcome::Failed {
                error: CoreError::StorageUnavailable(_),
            } => "You're offline and this browser cannot save your story for later.".to_string(),
            SubmissionOutcome::Failed { error } => format!("Failed to share story: {}", error),
        }
    }

    /// 結果に応じた遷移先（Noneならフォームに留まる）
    pub fn navigation(&self) -> Option<Route> {
        match self {
            SubmissionOutcome::Delivered { .. } | SubmissionOutcome::Deferred { .. } => Some(Route::Home),
            SubmissionOutcome::Rejected {
                error: CoreError::Auth(_),
            } => Some(Route::Login),
            _ => None,
        }
    }
}

/// 投稿の窓口
///
/// まず直接送り、レスポンスが得られなければOutboxに保存して同期を要求する。
/// 1回の投稿に対してOutboxのエントリは高々1件。
pub struct SubmissionCoordinator {
    api: Arc<StoryApi>,
    outbox: Arc<OutboxQueue>,
    credentials: Arc<dyn CredentialStore>,
    scheduler: Arc<dyn SyncScheduler>,
    ids: EntryIdGenerator,
    sync_tag: String,
}

impl SubmissionCoordinator {
    pub fn new(
        api: Arc<StoryApi>,
        outbox: Arc<OutboxQueue>,
        credentials: Arc<dyn CredentialStore>,
        scheduler: Arc<dyn SyncScheduler>,
        sync_tag: impl Into<String>,
    ) -> Self {
        Self {
            api,
            outbox,
            credentials,
            scheduler,
            ids: EntryIdGenerator::new(),
            sync_tag: sync_tag.into(),
        }
    }

    pub async fn submit(&self, payload: StoryPayload) -> SubmissionOutcome {
        let (id, created_at) = match self.ids.next_id(current_millis()) {
            Ok(next) => next,
            Err(error) => return SubmissionOutcome::Failed { error },
        };

        let Some(token) = self.credentials.token() else {
            return self.reject(CoreError::Auth("Not signed in".to_string()));
        };

        match self.api.add_story(&token, &payload).await {
            Ok(message) => {
                log::info!("Story {} delivered: {}", id, message);
                SubmissionOutcome::Delivered { message }
            }
            Err(e) if e.is_retryable() => {
                log::warn!("Story {} not delivered, queueing: {}", id, e);
                let entry = OutboxEntry {
                    id,
                    payload,
                    auth_snapshot: token,
                    created_at,
                };
                match self.defer(&entry).await {
                    Ok(()) => SubmissionOutcome::Deferred { id: entry.id },
                    Err(error) => {
                        log::error!("Could not queue story {}: {}", entry.id, error);
                        SubmissionOutcome::Failed { error }
                    }
                }
            }
            Err(e @ (CoreError::Auth(_) | CoreError::Validation(_))) => self.reject(e),
            Err(error) => {
                log::error!("Story {} failed: {}", id, error);
                SubmissionOutcome::Failed { error }
            }
        }
    }

    async fn defer(&self, entry: &OutboxEntry) -> Result<()> {
        self.outbox.enqueue(entry).await?;
        if let Err(e) = self.scheduler.request_sync(&self.sync_tag).await {
            // 同期が登録できなくても、onlineイベントからの再送で拾える
            log::warn!("Background sync unavailable: {}", e);
        }
        Ok(())
    }

    fn reject(&self, error: CoreError) -> SubmissionOutcome {
        if matches!(error, CoreError::Auth(_)) {
            log::warn!("Credential rejected, signing out: {}", error);
            self.credentials.clear();
        }
        SubmissionOutcome::Rejected { error }
    }
}
