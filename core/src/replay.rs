use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::StoryApi;
use crate::error::{CoreError, Result};
use crate::notifier::{Notifier, SyncMessage};
use crate::outbox::OutboxQueue;
use crate::types::{current_millis, OutboxEntry};

pub const SYNC_TAG: &str = "sync-new-stories";

/// 再送の方針
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayPolicy {
    /// これより古いエントリは配送を諦めて破棄する
    pub max_retention_ms: i64,
    /// Background Syncのタグ
    pub sync_tag: String,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            max_retention_ms: 24 * 60 * 60 * 1000,
            sync_tag: SYNC_TAG.to_string(),
        }
    }
}

/// 1回の再送パスの結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub delivered: Vec<String>,
    pub dropped: Vec<String>,
    /// パス終了時点でキューに残っている件数
    pub remaining: usize,
    /// パスを中断させた一時的なエラー
    pub interrupted: Option<CoreError>,
}

/// Outboxの再送エージェント
///
/// ポーリングはしない。同期イベントか、フォアグラウンドからの再送要求でのみ動く。
/// エントリは投入順に1件ずつ送り、一時的な失敗が起きたらその場でパスを終える
/// （失敗したエントリは先頭に残る）。
pub struct QueueReplayAgent {
    outbox: Arc<OutboxQueue>,
    api: Arc<StoryApi>,
    notifier: Arc<dyn Notifier>,
    policy: ReplayPolicy,
}

impl QueueReplayAgent {
    pub fn new(
        outbox: Arc<OutboxQueue>,
        api: Arc<StoryApi>,
        notifier: Arc<dyn Notifier>,
        policy: ReplayPolicy,
    ) -> Self {
        Self {
            outbox,
            api,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &ReplayPolicy {
        &self.policy
    }

    /// 再送パスを実行し、一時的な失敗で中断した場合はそのエラーを返す
    ///
    /// 同期イベントのハンドラはこのエラーでプラットフォームに再スケジュールさせる。
    pub async fn replay(&self) -> Result<ReplayReport> {
        let report = self.run_pass_at(current_millis()).await?;
        match report.interrupted.clone() {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    pub async fn run_pass(&self) -> Result<ReplayReport> {
        self.run_pass_at(current_millis()).await
    }

    /// `Err` はストア自体が読めなかった場合のみ
    pub async fn run_pass_at(&self, now: i64) -> Result<ReplayReport> {
        let entries = self.outbox.pending().await?;
        let mut report = ReplayReport::default();
        if entries.is_empty() {
            return Ok(report);
        }
        log::info!("Replaying {} queued submission(s)", entries.len());

        for (index, entry) in entries.iter().enumerate() {
            if now - entry.created_at > self.policy.max_retention_ms {
                self.drop_entry(entry, "Not delivered within the retention window".to_string())
                    .await?;
                report.dropped.push(entry.id.clone());
                continue;
            }

            match self.api.add_story(&entry.auth_snapshot, &entry.payload).await {
                Ok(message) => {
                    self.outbox.remove(&entry.id).await?;
                    log::info!("Delivered queued submission {}: {}", entry.id, message);
                    self.broadcast(&SyncMessage::SyncSuccess {
                        id: Some(entry.id.clone()),
                    })
                    .await;
                    report.delivered.push(entry.id.clone());
                }
                Err(e) if e.is_retryable() => {
                    log::warn!("Replay interrupted at {}: {}", entry.id, e);
                    report.remaining = entries.len() - index;
                    report.interrupted = Some(e);
                    return Ok(report);
                }
                Err(e) => {
                    self.drop_entry(entry, e.to_string()).await?;
                    report.dropped.push(entry.id.clone());
                }
            }
        }

        Ok(report)
    }

    /// 恒久的な失敗: キューから外して通知する
    async fn drop_entry(&self, entry: &OutboxEntry, reason: String) -> Result<()> {
        let failure = CoreError::PermanentQueueFailure {
            id: entry.id.clone(),
            reason: reason.clone(),
        };
        log::error!("{}", failure);

        self.outbox.remove(&entry.id).await?;
        self.broadcast(&SyncMessage::SyncFailed {
            id: entry.id.clone(),
            reason,
        })
        .await;
        Ok(())
    }

    async fn broadcast(&self, message: &SyncMessage) {
        match self.notifier.broadcast(message).await {
            Ok(0) => log::debug!("No open views to notify"),
            Ok(_) => {}
            Err(e) => log::warn!("Failed to notify views: {}", e),
        }
    }
}
