//! 推論サーバー

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use kurkkuvaimopo::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(version, about = "Serve the cucumber/moped classifier over HTTP")]
struct Args {
    /// 設定ファイル (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// モデルディレクトリ（MODEL_PATH より優先）
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// 計算デバイス (cpu | wgpu)
    #[arg(long)]
    device: Option<DeviceType>,

    /// 待ち受けポート（PORT より優先）
    #[arg(long)]
    port: Option<u16>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::load_or_default(self.config.as_deref())?;
        config.apply_env();

        if let Some(model_dir) = self.model_dir {
            config.paths.model_dir = model_dir;
        }
        if let Some(device) = self.device {
            config.device_type = device;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    kurkkuvaimopo::init_logging();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    config.log_summary();

    match kurkkuvaimopo::server::serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
