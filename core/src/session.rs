use std::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::types::{AuthUser, LoginResult};

const TOKEN_KEY: &str = "auth-token";
const USER_KEY: &str = "auth-user";

/// 認証情報の取得元
pub trait CredentialStore {
    /// 現在のBearerトークン
    fn token(&self) -> Option<String>;

    /// サインイン中のユーザー
    fn user(&self) -> Option<AuthUser>;

    /// サインイン結果を保存する
    fn save(&self, token: &str, user: &AuthUser) -> Result<()>;

    /// サインアウト（トークン破棄）
    fn clear(&self);

    fn save_login(&self, result: &LoginResult) -> Result<()> {
        self.save(&result.token, &result.user())
    }
}

/// localStorageに保存されたトークン（ウィンドウのみ）
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorageCredentials;

impl LocalStorageCredentials {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window()?.local_storage().ok().flatten()
    }

    fn remove(storage: &web_sys::Storage, key: &str) {
        if let Err(e) = storage.remove_item(key) {
            log::warn!("Could not remove {}: {}", key, crate::web::js_error_message(&e));
        }
    }
}

impl CredentialStore for LocalStorageCredentials {
    fn token(&self) -> Option<String> {
        Self::storage()?
            .get_item(TOKEN_KEY)
            .ok()
            .flatten()
            .filter(|t| !t.is_empty())
    }

    fn user(&self) -> Option<AuthUser> {
        let json = Self::storage()?.get_item(USER_KEY).ok().flatten()?;
        match serde_json::from_str(&json) {
            Ok(user) => Some(user),
            Err(e) => {
                log::warn!("Ignoring stored {}: {}", USER_KEY, e);
                None
            }
        }
    }

    fn save(&self, token: &str, user: &AuthUser) -> Result<()> {
        let storage = Self::storage().ok_or_else(|| CoreError::StorageUnavailable("localStorage".to_string()))?;
        storage.set_item(TOKEN_KEY, token)?;
        storage.set_item(USER_KEY, &serde_json::to_string(user)?)?;
        Ok(())
    }

    fn clear(&self) {
        match Self::storage() {
            Some(storage) => {
                Self::remove(&storage, TOKEN_KEY);
                Self::remove(&storage, USER_KEY);
            }
            None => log::warn!("localStorage is not available, credentials were not cleared"),
        }
    }
}

/// メモリ上の認証情報（テスト用）
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: Mutex<Option<String>>,
    user: Mutex<Option<AuthUser>>,
}

impl MemoryCredentials {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(|t| t.to_string())),
            user: Mutex::new(None),
        }
    }

    pub fn set(&self, token: &str) {
        *self.token.lock().unwrap() = Some(token.to_string());
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn user(&self) -> Option<AuthUser> {
        self.user.lock().unwrap().clone()
    }

    fn save(&self, token: &str, user: &AuthUser) -> Result<()> {
        *self.token.lock().unwrap() = Some(token.to_string());
        *self.user.lock().unwrap() = Some(user.clone());
        Ok(())
    }

    fn clear(&self) {
        *self.token.lock().unwrap() = None;
        *self.user.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_login_then_clear() {
        let credentials = MemoryCredentials::new(None);
        let result = LoginResult {
            user_id: "user-1".to_string(),
            name: "Dimas".to_string(),
            token: "tok".to_string(),
        };
        credentials.save_login(&result).unwrap();
        assert_eq!(credentials.token().as_deref(), Some("tok"));
        assert_eq!(credentials.user().map(|u| u.name), Some("Dimas".to_string()));

        credentials.clear();
        assert!(credentials.token().is_none());
        assert!(credentials.user().is_none());
    }

    #[test]
    fn test_stored_user_uses_camel_case() {
        let user = AuthUser {
            user_id: "user-1".to_string(),
            name: "Dimas".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&user).unwrap(),
            r#"{"userId":"user-1","name":"Dimas"}"#
        );
    }
}
