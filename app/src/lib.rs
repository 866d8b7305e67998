mod config;
mod foreground;
mod worker;

pub use config::{load_window_config, load_worker_config, save_window_config};
pub use foreground::StoryShareApp;
pub use worker::start_worker;

use wasm_bindgen::prelude::*;

/// WASM初期化とパニックフック設定
///
/// ウィンドウとService Workerの両方で同じモジュールが読み込まれる。
#[wasm_bindgen(start)]
pub fn start() {
    // パニック時にコンソールにスタックトレースを表示
    console_error_panic_hook::set_once();

    // ログ設定
    if let Err(e) = console_log::init_with_level(log::Level::Debug) {
        web_sys::console::error_1(&format!("Failed to init logger: {}", e).into());
    }

    log::info!("StoryShare WASM initialized");
}
