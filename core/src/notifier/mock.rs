use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::notifier::{LocalNotification, Notifier, SyncMessage};

/// 送信内容を記録するNotifier（テスト用）
#[derive(Clone)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<SyncMessage>>>,
    shown: Arc<Mutex<Vec<LocalNotification>>>,
    opened: Arc<Mutex<Vec<String>>>,
    open_views: usize,
}

impl RecordingNotifier {
    /// `open_views` は開いているビューの数（broadcastの戻り値）
    pub fn new(open_views: usize) -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            shown: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(Mutex::new(Vec::new())),
            open_views,
        }
    }

    pub fn messages(&self) -> Vec<SyncMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn shown(&self) -> Vec<LocalNotification> {
        self.shown.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait(?Send)]
impl Notifier for RecordingNotifier {
    async fn broadcast(&self, message: &SyncMessage) -> Result<usize> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(self.open_views)
    }

    async fn show(&self, notification: &LocalNotification) -> Result<()> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn open(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
