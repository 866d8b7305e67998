pub mod types;
pub mod error;
pub mod storage;
pub mod transport;
pub mod api;
pub mod session;
pub mod outbox;
pub mod replay;
pub mod submission;
pub mod cache;
pub mod notifier;
pub mod push;
pub mod library;
pub mod config;
pub mod foreground;
pub mod background;
pub mod web;

pub use error::{CoreError, Result};

pub use api::StoryApi;
pub use background::{BackgroundEvent, BackgroundOutcome, FetchRoute, WorkerHandle};
pub use cache::{BoundedCache, CachePolicy, CacheStrategyLayer, Served};
pub use config::AppConfig;
pub use foreground::{ForegroundEffect, ForegroundEvent, ForegroundHandle};
pub use library::StoryLibrary;
pub use notifier::{LocalNotification, Notifier, SyncMessage};
pub use outbox::{OutboxQueue, SyncScheduler};
pub use push::{Permission, PushPlatform, PushSubscriptionManager, SubscriptionStatus};
pub use replay::{QueueReplayAgent, ReplayPolicy, ReplayReport};
pub use session::CredentialStore;
pub use storage::Storage;
pub use submission::{Route, SubmissionCoordinator, SubmissionOutcome};
pub use transport::Transport;
pub use types::{AuthUser, GeoPoint, LoginResult, OutboxEntry, Photo, Story, StoryPayload};
