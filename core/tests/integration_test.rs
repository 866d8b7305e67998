// 統合テスト
// ウィンドウとService Workerの2つのコンテキストを、同じストアを共有する
// 2つのハンドルとして組み立てて動かす。

use std::sync::Arc;

use storyshare_core::background::{BackgroundEvent, BackgroundOutcome, FetchRoute, WorkerHandle};
use storyshare_core::config::AppConfig;
use storyshare_core::foreground::{ForegroundEffect, ForegroundEvent, ForegroundHandle};
use storyshare_core::notifier::mock::RecordingNotifier;
use storyshare_core::notifier::SyncMessage;
use storyshare_core::outbox::{OutboxQueue, RecordingScheduler};
use storyshare_core::push::mock::MockPushPlatform;
use storyshare_core::push::{Permission, SubscriptionStatus};
use storyshare_core::session::{CredentialStore, MemoryCredentials};
use storyshare_core::storage::mock::MockStorage;
use storyshare_core::storage::{Collection, UnavailableStorage};
use storyshare_core::submission::{Route, SubmissionOutcome};
use storyshare_core::transport::mock::MockTransport;
use storyshare_core::transport::{HttpRequest, Method};
use storyshare_core::types::{GeoPoint, Photo, StoryPayload};
use storyshare_core::CoreError;

struct App {
    page: ForegroundHandle,
    worker: WorkerHandle,
    storage: MockStorage,
    transport: MockTransport,
    credentials: Arc<MemoryCredentials>,
    page_notifier: RecordingNotifier,
    worker_notifier: RecordingNotifier,
    scheduler: RecordingScheduler,
    push_platform: MockPushPlatform,
}

fn app(prompt_answer: Permission) -> App {
    let config = AppConfig::default();
    let storage = MockStorage::new();
    let transport = MockTransport::new();
    let credentials = Arc::new(MemoryCredentials::new(Some("user-token")));
    let page_notifier = RecordingNotifier::new(1);
    let worker_notifier = RecordingNotifier::new(1);
    let scheduler = RecordingScheduler::new();
    let push_platform = MockPushPlatform::new(prompt_answer);

    let page = ForegroundHandle::new(
        &config,
        Arc::new(storage.clone()),
        Arc::new(transport.clone()),
        credentials.clone(),
        Arc::new(scheduler.clone()),
        Arc::new(push_platform.clone()),
        Arc::new(page_notifier.clone()),
    );
    let worker = WorkerHandle::new(
        &config,
        Arc::new(storage.clone()),
        Arc::new(transport.clone()),
        Arc::new(worker_notifier.clone()),
        Arc::new(scheduler.clone()),
    );

    App {
        page,
        worker,
        storage,
        transport,
        credentials,
        page_notifier,
        worker_notifier,
        scheduler,
        push_platform,
    }
}

fn payload(description: &str) -> StoryPayload {
    StoryPayload {
        description: description.to_string(),
        photo: Photo {
            file_name: "capture.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: vec![0xff, 0xd8, 0xff, 0xe0],
        },
        location: Some(GeoPoint { lat: -7.25, lon: 112.75 }),
    }
}

#[tokio::test]
async fn test_online_submission_is_delivered_directly() {
    let app = app(Permission::Granted);

    let outcome = app.page.submit(payload("Hello")).await;

    assert!(outcome.is_delivered());
    assert_eq!(outcome.navigation(), Some(Route::Home));
    assert_eq!(app.storage.count(Collection::Outbox), 0);
    let stories = app.transport.stories();
    assert_eq!(stories.len(), 1);
    assert_eq!(stories[0].description, "Hello");
    assert_eq!(stories[0].lat, Some(-7.25));
}

#[tokio::test]
async fn test_offline_submission_is_replayed_when_connectivity_returns() {
    let app = app(Permission::Granted);
    app.transport.set_online(false);

    let outcome = app.page.submit(payload("Offline test")).await;
    let id = match &outcome {
        SubmissionOutcome::Deferred { id } => id.clone(),
        other => panic!("Expected deferred outcome, got {:?}", other),
    };
    assert_eq!(app.storage.count(Collection::Outbox), 1);
    assert_eq!(app.scheduler.tags(), vec!["sync-new-stories".to_string()]);

    // 接続が戻り、プラットフォームが同期イベントを発火する
    app.transport.set_online(true);
    let outcome = app
        .worker
        .dispatch(BackgroundEvent::Sync {
            tag: "sync-new-stories".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, BackgroundOutcome::Replayed(_)));

    assert_eq!(app.storage.count(Collection::Outbox), 0);
    assert_eq!(app.transport.stories().len(), 1);
    assert_eq!(app.transport.stories()[0].description, "Offline test");

    let messages = app.worker_notifier.messages();
    assert_eq!(messages, vec![SyncMessage::SyncSuccess { id: Some(id.clone()) }]);

    // 開いているビューが受け取って送信待ち表示を消す
    let effects = app.page.dispatch(ForegroundEvent::Message(messages[0].clone())).await;
    assert_eq!(effects[0], ForegroundEffect::ClearPendingIndicator { id: Some(id) });
    assert!(effects.contains(&ForegroundEffect::PendingCount(0)));

    // 2回目の同期では何も送らない
    app.worker
        .dispatch(BackgroundEvent::Sync {
            tag: "sync-new-stories".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(app.transport.stories().len(), 1);
}

#[tokio::test]
async fn test_online_event_asks_worker_to_replay() {
    let app = app(Permission::Granted);
    app.transport.set_online(false);
    app.page.submit(payload("queued")).await;
    app.transport.set_online(true);

    let effects = app.page.dispatch(ForegroundEvent::Online).await;
    assert_eq!(effects, vec![ForegroundEffect::ReplayRequested]);

    // ページのNotifierが送ったメッセージをService Workerが受け取る
    let request = app.page_notifier.messages().pop().unwrap();
    app.worker.dispatch(BackgroundEvent::Message(request)).await.unwrap();

    assert_eq!(app.storage.count(Collection::Outbox), 0);
    assert_eq!(app.transport.stories().len(), 1);
}

#[tokio::test]
async fn test_queued_entries_are_delivered_in_submission_order() {
    let app = app(Permission::Granted);
    app.transport.set_online(false);
    for description in ["first", "second", "third"] {
        app.page.submit(payload(description)).await;
    }
    app.transport.set_online(true);

    app.worker
        .dispatch(BackgroundEvent::Sync {
            tag: "sync-new-stories".to_string(),
        })
        .await
        .unwrap();

    let descriptions: Vec<String> = app.transport.stories().into_iter().map(|s| s.description).collect();
    assert_eq!(descriptions, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_expired_credential_redirects_to_sign_in() {
    let app = app(Permission::Granted);
    app.transport.expire_token("user-token");

    let outcome = app.page.submit(payload("Hello")).await;

    assert!(matches!(
        outcome,
        SubmissionOutcome::Rejected {
            error: CoreError::Auth(_)
        }
    ));
    assert_eq!(outcome.navigation(), Some(Route::Login));
    assert_eq!(app.storage.count(Collection::Outbox), 0);
    assert_eq!(app.credentials.token(), None);
}

#[tokio::test]
async fn test_sixty_first_image_evicts_the_first() {
    let app = app(Permission::Granted);
    let url = |n: usize| format!("https://story-api.dicoding.dev/images/stories/{}.jpg", n);

    for n in 1..=61 {
        let route = app.worker.route("GET", &url(n), true);
        assert_eq!(route, FetchRoute::Image);
        app.worker
            .dispatch(BackgroundEvent::Fetch {
                request: HttpRequest::get(url(n)),
                route,
            })
            .await
            .unwrap();
    }

    let images = app.worker.cache().images();
    assert_eq!(images.len().await.unwrap(), 60);
    assert!(images.get(&url(1)).await.unwrap().is_none());
    assert!(images.get(&url(2)).await.unwrap().is_some());
    assert!(images.get(&url(61)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_denied_push_permission_leaves_unsubscribed() {
    let app = app(Permission::Denied);

    let err = app.page.push().enable().await.unwrap_err();

    assert_eq!(err, CoreError::PermissionDenied);
    assert_eq!(app.page.push().status().await, SubscriptionStatus::Unsubscribed);
    assert_eq!(app.transport.request_count(Method::Post, "/notifications/subscribe"), 0);
    assert!(app.push_platform.subscription().is_none());
}

#[tokio::test]
async fn test_push_toggle_registers_with_server() {
    let app = app(Permission::Granted);

    assert_eq!(app.page.push().toggle().await.unwrap(), SubscriptionStatus::Subscribed);
    assert_eq!(app.transport.push_registrations().len(), 1);

    assert_eq!(app.page.push().toggle().await.unwrap(), SubscriptionStatus::Unsubscribed);
    assert!(app.transport.push_registrations().is_empty());
}

#[tokio::test]
async fn test_lost_response_can_duplicate_story() {
    // 上流に冪等キーが無いため、保存後にレスポンスが失われると再送で重複する
    let app = app(Permission::Granted);
    app.transport.lose_next_response();

    let outcome = app.page.submit(payload("Hello")).await;
    assert!(matches!(outcome, SubmissionOutcome::Deferred { .. }));

    app.worker
        .dispatch(BackgroundEvent::Sync {
            tag: "sync-new-stories".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(app.transport.stories().len(), 2);
    assert_eq!(app.storage.count(Collection::Outbox), 0);
}

#[tokio::test]
async fn test_story_feed_survives_going_offline() {
    let app = app(Permission::Granted);
    let list = "https://story-api.dicoding.dev/v1/stories?page=1&size=20&location=1";
    app.page.submit(payload("cached")).await;

    let fetch = |request: HttpRequest| BackgroundEvent::Fetch {
        request,
        route: FetchRoute::StoryRead,
    };
    app.worker.dispatch(fetch(HttpRequest::get(list))).await.unwrap();
    app.transport.set_online(false);

    match app.worker.dispatch(fetch(HttpRequest::get(list))).await.unwrap() {
        BackgroundOutcome::Respond(served) => {
            assert!(served.from_cache);
            assert!(served.response.text().contains("cached"));
        }
        other => panic!("Expected cached response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_without_storage_online_features_still_work() {
    let config = AppConfig::default();
    let transport = MockTransport::new();
    let page = ForegroundHandle::new(
        &config,
        Arc::new(UnavailableStorage::new("IndexedDB blocked")),
        Arc::new(transport.clone()),
        Arc::new(MemoryCredentials::new(Some("user-token"))),
        Arc::new(RecordingScheduler::new()),
        Arc::new(MockPushPlatform::new(Permission::Granted)),
        Arc::new(RecordingNotifier::new(0)),
    );

    assert!(page.submit(payload("Hello")).await.is_delivered());

    transport.set_online(false);
    let outcome = page.submit(payload("Offline")).await;
    assert!(matches!(
        outcome,
        SubmissionOutcome::Failed {
            error: CoreError::StorageUnavailable(_)
        }
    ));
    assert_eq!(page.pending_count().await, 0);
}

#[tokio::test]
async fn test_outbox_is_shared_between_contexts() {
    let app = app(Permission::Granted);
    app.transport.set_online(false);
    app.page.submit(payload("shared")).await;

    // Service Worker側から同じストアを開く
    let queue = OutboxQueue::new(Arc::new(app.storage.clone()));
    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].auth_snapshot, "user-token");
}
