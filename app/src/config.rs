use anyhow::{anyhow, Context};
use storyshare_core::config::AppConfig;
use wasm_bindgen::JsCast;
use web_sys::{ServiceWorkerGlobalScope, UrlSearchParams};

const STORAGE_KEY: &str = "storyshare_config";
const WORKER_QUERY_PARAM: &str = "config";

/// LocalStorageから設定を読み込む（無ければデフォルト）
pub fn load_window_config() -> AppConfig {
    match read_window_config() {
        Ok(Some(config)) => config,
        Ok(None) => AppConfig::default(),
        Err(e) => {
            log::warn!("Ignoring stored config: {:#}", e);
            AppConfig::default()
        }
    }
}

fn read_window_config() -> anyhow::Result<Option<AppConfig>> {
    let storage = web_sys::window()
        .context("no window")?
        .local_storage()
        .map_err(|_| anyhow!("localStorage is not accessible"))?
        .context("localStorage is disabled")?;

    let Some(json) = storage
        .get_item(STORAGE_KEY)
        .map_err(|_| anyhow!("failed to read {}", STORAGE_KEY))?
    else {
        return Ok(None);
    };

    let config = AppConfig::from_json(&json).with_context(|| format!("invalid {}", STORAGE_KEY))?;
    Ok(Some(config))
}

/// LocalStorageに保存（失敗はログのみ）
pub fn save_window_config(config: &AppConfig) {
    if let Err(e) = write_window_config(config) {
        log::warn!("Could not save config: {:#}", e);
    }
}

fn write_window_config(config: &AppConfig) -> anyhow::Result<()> {
    let storage = web_sys::window()
        .context("no window")?
        .local_storage()
        .map_err(|_| anyhow!("localStorage is not accessible"))?
        .context("localStorage is disabled")?;

    let json = config.to_json().context("cannot serialize config")?;
    storage
        .set_item(STORAGE_KEY, &json)
        .map_err(|_| anyhow!("failed to write {}", STORAGE_KEY))?;
    Ok(())
}

/// Service Workerのスクリプトに付いた `?config=` から読み込む
///
/// Service WorkerはlocalStorageを使えないので、登録時にクエリで渡す。
pub fn load_worker_config() -> AppConfig {
    match read_worker_config() {
        Ok(Some(config)) => config,
        Ok(None) => AppConfig::default(),
        Err(e) => {
            log::warn!("Ignoring worker config: {:#}", e);
            AppConfig::default()
        }
    }
}

fn read_worker_config() -> anyhow::Result<Option<AppConfig>> {
    let scope: ServiceWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .map_err(|_| anyhow!("not running in a service worker"))?;

    let search = scope.location().search();
    let params = UrlSearchParams::new_with_str(&search).map_err(|_| anyhow!("malformed worker URL query"))?;
    let Some(json) = params.get(WORKER_QUERY_PARAM) else {
        return Ok(None);
    };

    let config = AppConfig::from_json(&json).context("invalid worker config")?;
    Ok(Some(config))
}
