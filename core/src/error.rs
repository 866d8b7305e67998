use thiserror::Error;
use wasm_bindgen::JsValue;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// サーバーが入力を拒否した（再送しない）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 認証情報が無効・期限切れ（再送しない、強制サインアウト）
    #[error("Auth error: {0}")]
    Auth(String),

    /// レスポンスが得られなかった（Outbox経由で再送）
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// サーバーに到達したが5xxを返した
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// 永続ストレージが使えない（オフライン機能のみ無効化）
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Permanent queue failure for {id}: {reason}")]
    PermanentQueueFailure { id: String, reason: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Push error: {0}")]
    PushError(String),

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// 後で再送すれば成功しうるエラーか
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Connectivity(_) | CoreError::Server { .. })
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, CoreError::StorageUnavailable(_))
    }
}

impl From<JsValue> for CoreError {
    fn from(value: JsValue) -> Self {
        if let Some(s) = value.as_string() {
            CoreError::JsError(s)
        } else {
            CoreError::JsError(format!("{:?}", value))
        }
    }
}

impl From<CoreError> for JsValue {
    fn from(error: CoreError) -> Self {
        JsValue::from_str(&error.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        CoreError::ParseError(error.to_string())
    }
}

impl From<rexie::Error> for CoreError {
    fn from(error: rexie::Error) -> Self {
        CoreError::StorageError(error.to_string())
    }
}

impl From<serde_wasm_bindgen::Error> for CoreError {
    fn from(error: serde_wasm_bindgen::Error) -> Self {
        CoreError::ParseError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
