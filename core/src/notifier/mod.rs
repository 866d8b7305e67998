pub mod mock;
pub mod web;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// コンテキスト間メッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// Outboxの投稿が配送された
    #[serde(rename = "SYNC_SUCCESS")]
    SyncSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Outboxの投稿が恒久的に失敗して破棄された
    #[serde(rename = "SYNC_FAILED")]
    SyncFailed { id: String, reason: String },
    /// フォアグラウンドからの再送要求（onlineイベント時）
    #[serde(rename = "REPLAY_OUTBOX")]
    ReplayOutbox,
}

impl SyncMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// システム通知の内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// クリック時に開くURL
    pub url: String,
    pub actions: Vec<NotificationAction>,
}

pub const DEFAULT_PUSH_TITLE: &str = "StoryShare - New story!";
pub const DEFAULT_PUSH_BODY: &str = "Someone just shared a new story on StoryShare!";
pub const DEFAULT_ICON: &str = "/favicon.png";

impl LocalNotification {
    /// Push受信時のデフォルト通知
    pub fn default_push(icon: &str) -> Self {
        Self {
            title: DEFAULT_PUSH_TITLE.to_string(),
            body: DEFAULT_PUSH_BODY.to_string(),
            icon: icon.to_string(),
            badge: icon.to_string(),
            tag: "story-notification".to_string(),
            url: "/".to_string(),
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "View story".to_string(),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                },
            ],
        }
    }

    /// Pushペイロードから通知を組み立てる
    ///
    /// JSONならフィールドで上書き、JSONでなければ本文として扱う。空ならデフォルト。
    pub fn from_push_payload(payload: Option<&str>, icon: &str) -> Self {
        let mut notification = Self::default_push(icon);
        let payload = match payload.map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => return notification,
        };

        let value = match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(v) if v.is_object() => v,
            _ => {
                notification.body = payload.to_string();
                return notification;
            }
        };

        let field = |name: &str| value.get(name).and_then(|v| v.as_str()).map(|s| s.to_string());
        if let Some(title) = field("title") {
            notification.title = title;
        }
        // Dicoding形式 {title, options: {body}} にも対応
        let options_body = value
            .get("options")
            .and_then(|o| o.get("body"))
            .and_then(|b| b.as_str())
            .map(|s| s.to_string());
        if let Some(body) = field("body").or(options_body) {
            notification.body = body;
        }
        if let Some(icon) = field("icon") {
            notification.icon = icon;
        }
        if let Some(badge) = field("badge") {
            notification.badge = badge;
        }
        let data_url = value
            .get("data")
            .and_then(|d| d.get("url"))
            .and_then(|u| u.as_str())
            .map(|s| s.to_string());
        if let Some(url) = data_url.or_else(|| field("url")) {
            notification.url = url;
        }

        notification
    }

    /// 配送完了の確認通知
    pub fn sync_success(icon: &str) -> Self {
        Self {
            title: "Story uploaded!".to_string(),
            body: "Your saved story has been uploaded to the server.".to_string(),
            icon: icon.to_string(),
            badge: icon.to_string(),
            tag: "sync-success".to_string(),
            url: "/".to_string(),
            actions: Vec::new(),
        }
    }
}

/// 通知クリック時の動作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    Dismiss,
    /// 同一オリジンのウィンドウがあればフォーカス、なければ新規に開く
    Open(String),
}

impl ClickAction {
    pub fn from_click(action: &str, url: Option<&str>) -> Self {
        if action == "close" {
            return ClickAction::Dismiss;
        }
        let url = url.filter(|u| !u.is_empty()).unwrap_or("/");
        ClickAction::Open(url.to_string())
    }
}

/// バックグラウンドからフォアグラウンドへの通知
///
/// 配送保証はない。開いているビューが無ければ誰にも届かず、
/// ビューは次回ロード時にストアを読み直して整合する。
#[async_trait(?Send)]
pub trait Notifier {
    /// 開いている全ビューに送信し、受信者数を返す
    async fn broadcast(&self, message: &SyncMessage) -> Result<usize>;

    /// システム通知を表示
    async fn show(&self, notification: &LocalNotification) -> Result<()>;

    /// URLを開く（同一オリジンのウィンドウがあればそちらを使う）
    async fn open(&self, url: &str) -> Result<()>;
}
