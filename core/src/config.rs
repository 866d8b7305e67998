use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;
use crate::error::Result;
use crate::notifier::DEFAULT_ICON;
use crate::replay::ReplayPolicy;

pub const DEFAULT_BASE_URL: &str = "https://story-api.dicoding.dev/v1";

/// Dicoding Story APIのVAPID公開鍵
pub const DEFAULT_VAPID_PUBLIC_KEY: &str =
    "BCCs2eonMI-6H2ctvFaWg-UYdDv387Vno_bzUzALpB442r2lCnsHmtrx8biyPi_E-1fSGABK_Qs_GlvPoJJqxbk";

/// アプリ設定
///
/// 欠けた項目はデフォルト値で埋める。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub vapid_public_key: String,
    pub story_cache: CachePolicy,
    pub image_cache: CachePolicy,
    pub replay: ReplayPolicy,
    pub notification_icon: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            vapid_public_key: DEFAULT_VAPID_PUBLIC_KEY.to_string(),
            story_cache: CachePolicy::stories(),
            image_cache: CachePolicy::images(),
            replay: ReplayPolicy::default(),
            notification_icon: DEFAULT_ICON.to_string(),
        }
    }
}

impl AppConfig {
    /// 部分的なJSONで上書き
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
