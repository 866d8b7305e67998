use std::rc::Rc;
use std::sync::Arc;

use js_sys::{Promise, Reflect};
use storyshare_core::background::{BackgroundEvent, BackgroundOutcome, FetchRoute, WorkerHandle};
use storyshare_core::cache::web::BrowserCache;
use storyshare_core::cache::{ImageHit, IMAGE_CACHE_NAME};
use storyshare_core::notifier::web::ServiceWorkerNotifier;
use storyshare_core::notifier::SyncMessage;
use storyshare_core::outbox::BackgroundSyncScheduler;
use storyshare_core::storage::indexeddb::LazyIndexedDbStorage;
use storyshare_core::transport::fetch::{self, FetchTransport};
use storyshare_core::transport::{HttpRequest, HttpResponse};
use storyshare_core::web;
use tokio::sync::oneshot;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::{
    ExtendableEvent, ExtendableMessageEvent, FetchEvent, NotificationEvent, PushEvent, Request, RequestDestination,
    Response, ServiceWorkerGlobalScope,
};

use crate::config::load_worker_config;

/// Service Workerのエントリポイント
///
/// ワーカースクリプトのトップレベルから同期的に呼ぶこと。
/// リスナーは評価中に登録しないとイベントを受け取れない。
#[wasm_bindgen]
pub fn start_worker() -> Result<(), JsValue> {
    let scope: ServiceWorkerGlobalScope = js_sys::global().dyn_into()?;
    let config = load_worker_config();

    let worker = Rc::new(
        WorkerHandle::new(
            &config,
            Arc::new(LazyIndexedDbStorage::new()),
            Arc::new(FetchTransport::new()),
            Arc::new(ServiceWorkerNotifier::new(scope.clone())),
            Arc::new(BackgroundSyncScheduler),
        )
        .with_opaque_bodies(Arc::new(BrowserCache::new(IMAGE_CACHE_NAME))),
    );

    // install / activate: 新しいワーカーをすぐに有効にする
    {
        let scope_for_install = scope.clone();
        let on_install = Closure::wrap(Box::new(move |event: ExtendableEvent| {
            match scope_for_install.skip_waiting() {
                Ok(promise) => {
                    let _ = event.wait_until(&promise);
                }
                Err(e) => log::warn!("skipWaiting failed: {}", web::js_error_message(&e)),
            }
        }) as Box<dyn FnMut(ExtendableEvent)>);
        scope.add_event_listener_with_callback("install", on_install.as_ref().unchecked_ref())?;
        on_install.forget();
    }
    {
        let scope_for_activate = scope.clone();
        let on_activate = Closure::wrap(Box::new(move |event: ExtendableEvent| {
            let _ = event.wait_until(&scope_for_activate.clients().claim());
        }) as Box<dyn FnMut(ExtendableEvent)>);
        scope.add_event_listener_with_callback("activate", on_activate.as_ref().unchecked_ref())?;
        on_activate.forget();
    }

    // fetch
    {
        let worker = worker.clone();
        let on_fetch = Closure::wrap(Box::new(move |event: FetchEvent| {
            handle_fetch(worker.clone(), event);
        }) as Box<dyn FnMut(FetchEvent)>);
        scope.add_event_listener_with_callback("fetch", on_fetch.as_ref().unchecked_ref())?;
        on_fetch.forget();
    }

    // sync: rejectすればプラットフォームが後で再試行する
    {
        let worker = worker.clone();
        let on_sync = Closure::wrap(Box::new(move |event: ExtendableEvent| {
            let tag = Reflect::get(&event, &JsValue::from_str("tag"))
                .ok()
                .and_then(|t| t.as_string())
                .unwrap_or_default();
            log::info!("Sync event: {}", tag);
            let promise = dispatch_promise(worker.clone(), BackgroundEvent::Sync { tag });
            let _ = event.wait_until(&promise);
        }) as Box<dyn FnMut(ExtendableEvent)>);
        scope.add_event_listener_with_callback("sync", on_sync.as_ref().unchecked_ref())?;
        on_sync.forget();
    }

    // push
    {
        let worker = worker.clone();
        let on_push = Closure::wrap(Box::new(move |event: PushEvent| {
            let data = event.data().map(|d| d.text());
            let promise = dispatch_promise(worker.clone(), BackgroundEvent::Push { data });
            let _ = event.wait_until(&promise);
        }) as Box<dyn FnMut(PushEvent)>);
        scope.add_event_listener_with_callback("push", on_push.as_ref().unchecked_ref())?;
        on_push.forget();
    }

    // notificationclick
    {
        let worker = worker.clone();
        let on_click = Closure::wrap(Box::new(move |event: NotificationEvent| {
            let notification = event.notification();
            notification.close();
            let url = Reflect::get(&notification.data(), &JsValue::from_str("url"))
                .ok()
                .and_then(|u| u.as_string());
            let promise = dispatch_promise(
                worker.clone(),
                BackgroundEvent::NotificationClick {
                    action: Reflect::get(&event, &JsValue::from_str("action"))
                        .ok()
                        .and_then(|a| a.as_string())
                        .unwrap_or_default(),
                    url,
                },
            );
            let _ = event.wait_until(&promise);
        }) as Box<dyn FnMut(NotificationEvent)>);
        scope.add_event_listener_with_callback("notificationclick", on_click.as_ref().unchecked_ref())?;
        on_click.forget();
    }

    // message: ページからの再送要求
    {
        let on_message = Closure::wrap(Box::new(move |event: ExtendableMessageEvent| {
            let message = web::js_to_json(&event.data()).and_then(|json| SyncMessage::from_json(&json));
            match message {
                Ok(message) => {
                    let promise = dispatch_promise(worker.clone(), BackgroundEvent::Message(message));
                    let _ = event.wait_until(&promise);
                }
                Err(e) => log::debug!("Ignoring message: {}", e),
            }
        }) as Box<dyn FnMut(ExtendableMessageEvent)>);
        scope.add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())?;
        on_message.forget();
    }

    log::info!("StoryShare service worker started ({})", config.base_url);
    Ok(())
}

fn dispatch_promise(worker: Rc<WorkerHandle>, event: BackgroundEvent) -> Promise {
    future_to_promise(async move {
        match worker.dispatch(event).await {
            Ok(outcome) => {
                log::debug!("Background outcome: {:?}", outcome);
                Ok(JsValue::UNDEFINED)
            }
            Err(e) => {
                log::warn!("Background event failed: {}", e);
                Err(e.into())
            }
        }
    })
}

/// `respondWith` と `waitUntil` はどちらもイベント中に同期的に呼ぶ必要がある。
/// 再検証が必要かは応答を作るまで分からないので、oneshotでつなぐ。
fn handle_fetch(worker: Rc<WorkerHandle>, event: FetchEvent) {
    let request = event.request();
    let is_image = request.destination() == RequestDestination::Image;
    let route = worker.route(&request.method(), &request.url(), is_image);
    if route == FetchRoute::Passthrough {
        return;
    }

    let (revalidate_tx, revalidate_rx) = oneshot::channel::<HttpRequest>();

    let response = {
        let worker = worker.clone();
        future_to_promise(async move {
            let response = if route == FetchRoute::Image {
                respond_image(&worker, &request).await
            } else {
                respond(&worker, &request, route, revalidate_tx).await
            };
            Ok(response.into())
        })
    };
    if let Err(e) = event.respond_with(&response) {
        log::error!("respondWith failed: {}", web::js_error_message(&e));
        return;
    }

    let refresh = future_to_promise(async move {
        if let Ok(request) = revalidate_rx.await {
            worker.revalidate(&request).await;
        }
        Ok(JsValue::UNDEFINED)
    });
    let _ = event.wait_until(&refresh);
}

async fn respond(
    worker: &WorkerHandle,
    request: &Request,
    route: FetchRoute,
    revalidate_tx: oneshot::Sender<HttpRequest>,
) -> Response {
    let http_request = match fetch::from_web_request(request).await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Cannot read request {}: {}", request.url(), e);
            return network_or_error(request).await;
        }
    };

    let event = BackgroundEvent::Fetch {
        request: http_request.clone(),
        route,
    };
    let served = match worker.dispatch(event).await {
        Ok(BackgroundOutcome::Respond(served)) => served,
        Ok(_) => return refetch_if_safe(request).await,
        Err(e) => {
            log::warn!("Fetch for {} failed: {}", request.url(), e);
            return Response::error();
        }
    };

    if served.revalidate {
        let _ = revalidate_tx.send(http_request);
    }
    match fetch::to_web_response(&served.response) {
        Ok(Some(response)) => response,
        Ok(None) => refetch_if_safe(request).await,
        Err(e) => {
            log::warn!("Cannot build response for {}: {}", request.url(), e);
            refetch_if_safe(request).await
        }
    }
}

/// 画像はcache-first
///
/// opaqueな画像はRustから本体を読めないので、元のRequestのまま取得して
/// 本体をCache Storageへ、メタデータだけを有界キャッシュへ置く。
async fn respond_image(worker: &WorkerHandle, request: &Request) -> Response {
    let url = request.url();
    let browser = BrowserCache::new(IMAGE_CACHE_NAME);

    match worker.cache().image_hit(&url).await {
        ImageHit::Body(cached) => match fetch::to_web_response(&cached) {
            Ok(Some(response)) => return response,
            Ok(None) => {}
            Err(e) => log::warn!("Cannot build cached image {}: {}", url, e),
        },
        ImageHit::Opaque => match browser.lookup(request).await {
            Ok(Some(response)) => return response,
            Ok(None) => log::debug!("Opaque body for {} is gone, refetching", url),
            Err(e) => log::warn!("Cache Storage lookup for {} failed: {}", url, e),
        },
        ImageHit::Miss => {}
    }

    let response = match web::fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Image fetch for {} failed: {}", url, e);
            return Response::error();
        }
    };
    let copy = match response.clone() {
        Ok(copy) => copy,
        Err(e) => {
            log::warn!("Cannot clone image response {}: {}", url, web::js_error_message(&e));
            return response;
        }
    };

    match copy.status() {
        0 => match browser.store(request, &copy).await {
            Ok(()) => worker.cache().store_image(&url, &HttpResponse::opaque()).await,
            Err(e) => log::warn!("Cache Storage put for {} failed: {}", url, e),
        },
        200 => match fetch::from_web_response(copy).await {
            Ok(cached) => worker.cache().store_image(&url, &cached).await,
            Err(e) => log::warn!("Cannot read image {}: {}", url, e),
        },
        _ => {}
    }
    response
}

/// dispatch後にネットワークへ戻すのはGETだけ（送信系を二重に送らない）
async fn refetch_if_safe(request: &Request) -> Response {
    if request.method() == "GET" {
        network_or_error(request).await
    } else {
        Response::error()
    }
}

async fn network_or_error(request: &Request) -> Response {
    match web::fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Network fallback failed for {}: {}", request.url(), e);
            Response::error()
        }
    }
}
