//! ログ出力の初期化
//!
//! `tracing` のイベントを標準エラー出力へ書き出す。
//! `RUST_LOG` が設定されていればそれに従う。

use tracing_subscriber::EnvFilter;

/// 既定のフィルタ
fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "warn" }
}

/// グローバルなサブスクライバを設定する（プロセスで1回だけ呼ぶ）
///
/// すでに設定済みの場合は何もしない。
pub fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
