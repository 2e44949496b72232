//! 学習ジョブ: モデルがなければ画像を集めて学習する

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use kurkkuvaimopo::model::{AppConfig, DeviceType};
use kurkkuvaimopo::pipeline::{run_pipeline, PipelineOutcome};

#[derive(Parser, Debug)]
#[command(version, about = "Gather cucumber and moped images and train the classifier")]
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

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    epochs: Option<usize>,

    /// クラスごとのサンプル数
    #[arg(long)]
    sample_size: Option<usize>,

    /// 画像取得のワーカー数
    #[arg(long)]
    workers: Option<usize>,
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
        if let Some(seed) = self.seed {
            config.training.seed = Some(seed);
        }
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if let Some(sample_size) = self.sample_size {
            config.acquisition.sample_size = sample_size;
        }
        if let Some(workers) = self.workers {
            config.acquisition.workers = Some(workers);
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    kurkkuvaimopo::init_logging();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    config.log_summary();

    match run_pipeline(&config) {
        Ok(PipelineOutcome::AlreadyTrained) => ExitCode::SUCCESS,
        Ok(PipelineOutcome::TrainedFromManifests(report)) => {
            tracing::info!("学習完了: {}", report.model_path.display());
            ExitCode::SUCCESS
        }
        Ok(PipelineOutcome::TrainedFromScratch { manifests, report }) => {
            for manifest in &manifests {
                tracing::info!(
                    "{}: {} 行 (失敗 {}) -> {}",
                    manifest.label,
                    manifest.rows.len(),
                    manifest.failed(),
                    manifest.manifest_path.display()
                );
            }
            tracing::info!("学習完了: {}", report.model_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
