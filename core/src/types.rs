use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::storage::{Collection, Record};

/// 位置情報（任意）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// 投稿する画像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// ストーリー投稿の中身（テキスト + 画像 + 任意の位置情報）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPayload {
    pub description: String,
    pub photo: Photo,
    pub location: Option<GeoPoint>,
}

/// 未確定の投稿（Outbox）
///
/// 作成後は変更しない。配送成功か恒久的失敗でのみ削除される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub payload: StoryPayload,
    /// キュー投入時点のBearerトークン
    pub auth_snapshot: String,
    pub created_at: i64,
}

impl Record for OutboxEntry {
    const COLLECTION: Collection = Collection::Outbox;

    fn key(&self) -> &str {
        &self.id
    }
}

/// APIから取得したストーリー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

/// サインイン中のユーザー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub user_id: String,
    pub name: String,
}

/// `POST /login` の `loginResult`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub user_id: String,
    pub name: String,
    pub token: String,
}

impl LoginResult {
    pub fn user(&self) -> AuthUser {
        AuthUser {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// オフライン表示用のお気に入り（リモートのスナップショット）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    #[serde(flatten)]
    pub story: Story,
    pub saved_at: i64,
}

impl Record for FavoriteRecord {
    const COLLECTION: Collection = Collection::Favorites;

    fn key(&self) -> &str {
        &self.story.id
    }
}

/// ローカル専用の非表示マーカー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenTombstone {
    pub id: String,
    pub hidden_at: i64,
}

impl Record for HiddenTombstone {
    const COLLECTION: Collection = Collection::Hidden;

    fn key(&self) -> &str {
        &self.id
    }
}

/// Push購読の鍵（Web Push標準の名前でシリアライズ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    #[serde(rename = "p256dh")]
    pub public_key: String,
    #[serde(rename = "auth")]
    pub auth_secret: String,
}

pub const PUSH_STATE_KEY: &str = "current";

/// Push購読状態（ブラウザ×ユーザーごとに1つ）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscriptionState {
    pub endpoint: String,
    pub keys: PushKeys,
    #[serde(default)]
    pub enabled: bool,
}

impl Record for PushSubscriptionState {
    const COLLECTION: Collection = Collection::PushSubscription;

    fn key(&self) -> &str {
        PUSH_STATE_KEY
    }
}

/// 時刻ベースの単調増加ID生成器
///
/// IDは `{millis:013}-{random hex}` 形式で、辞書順が生成順と一致する。
#[derive(Debug, Default)]
pub struct EntryIdGenerator {
    last_millis: Cell<i64>,
}

impl EntryIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しいIDと、そのIDに対応する作成時刻を返す
    pub fn next_id(&self, now: i64) -> Result<(String, i64)> {
        let millis = now.max(self.last_millis.get() + 1);
        self.last_millis.set(millis);

        let mut suffix = [0u8; 4];
        getrandom::getrandom(&mut suffix)
            .map_err(|e| CoreError::Other(format!("random source unavailable: {}", e)))?;

        Ok((format!("{:013}-{}", millis, hex::encode(suffix)), millis))
    }
}

/// 現在のUNIX時刻（ミリ秒）
pub fn current_millis() -> i64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now() as i64
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// バイナリをhex文字列として保存する
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}
