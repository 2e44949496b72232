//! キュウリかモペットか
//!
//! ラベル付きURL一覧から画像を集めて二値分類CNNを学習し、HTTPで推論を提供します。

#![recursion_limit = "256"]

pub mod types;
pub mod csv_loader;
pub mod dataset;
pub mod model;
pub mod gate;

#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "ml")]
pub mod pipeline;
#[cfg(feature = "ml")]
pub mod server;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// ログ出力を初期化（`RUST_LOG` 未指定なら info）
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
