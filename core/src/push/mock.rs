use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::push::{Permission, PushPlatform};
use crate::types::{PushKeys, PushSubscriptionState};

#[derive(Debug)]
struct MockPushState {
    permission: Permission,
    prompt_answer: Permission,
    prompts: usize,
    subscription: Option<PushSubscriptionState>,
    subscribe_calls: usize,
    fail_unsubscribe: bool,
}

/// テスト用のPush機能
///
/// プロンプトには `prompt_answer` で答える。
#[derive(Debug, Clone)]
pub struct MockPushPlatform {
    state: Arc<Mutex<MockPushState>>,
}

impl MockPushPlatform {
    pub fn new(prompt_answer: Permission) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockPushState {
                permission: Permission::Default,
                prompt_answer,
                prompts: 0,
                subscription: None,
                subscribe_calls: 0,
                fail_unsubscribe: false,
            })),
        }
    }

    /// 以前のセッションで作られた購読を置く
    pub fn preinstall(&self, endpoint: &str) {
        self.state.lock().unwrap().subscription = Some(subscription(endpoint));
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.state.lock().unwrap().fail_unsubscribe = fail;
    }

    pub fn clear_subscription(&self) {
        self.state.lock().unwrap().subscription = None;
    }

    pub fn subscription(&self) -> Option<PushSubscriptionState> {
        self.state.lock().unwrap().subscription.clone()
    }

    pub fn prompts(&self) -> usize {
        self.state.lock().unwrap().prompts
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().unwrap().subscribe_calls
    }
}

fn subscription(endpoint: &str) -> PushSubscriptionState {
    PushSubscriptionState {
        endpoint: endpoint.to_string(),
        keys: PushKeys {
            public_key: "BNcR-p256dh".to_string(),
            auth_secret: "tBHI-auth".to_string(),
        },
        enabled: false,
    }
}

#[async_trait(?Send)]
impl PushPlatform for MockPushPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission {
        self.state.lock().unwrap().permission
    }

    async fn request_permission(&self) -> Result<Permission> {
        let mut state = self.state.lock().unwrap();
        state.prompts += 1;
        state.permission = state.prompt_answer;
        Ok(state.permission)
    }

    async fn current_subscription(&self) -> Result<Option<PushSubscriptionState>> {
        Ok(self.state.lock().unwrap().subscription.clone())
    }

    async fn subscribe(&self, _application_server_key: &[u8]) -> Result<PushSubscriptionState> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_calls += 1;
        let created = subscription(&format!("https://push.example/{}", state.subscribe_calls));
        state.subscription = Some(created.clone());
        Ok(created)
    }

    async fn unsubscribe(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.fail_unsubscribe {
            return Err(CoreError::PushError("unsubscribe() rejected".to_string()));
        }
        Ok(state.subscription.take().is_some())
    }
}
