//! 学習ジョブ本体
//!
//! 入口判定の結果に従って、画像収集・マニフェスト書き出し・学習を順に実行します。

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use burn::backend::{Autodiff, NdArray, Wgpu};
use burn_ndarray::NdArrayDevice;
use burn_wgpu::WgpuDevice;

use crate::csv_loader::{load_manifests, load_source_urls};
use crate::dataset::{ClassManifest, DatasetBuilder};
use crate::gate::{GateDecision, ModelGate};
use crate::ml::{train_model, TrainingReport};
use crate::model::{log_metadata_info, AppConfig, DeviceType, TrainingSettings};
use crate::types::{ClassLabel, DataLayout, ManifestRow};

/// ジョブの結果
#[derive(Debug)]
pub enum PipelineOutcome {
    /// 学習済みモデルがあったので何もしなかった
    AlreadyTrained,
    /// 既存マニフェストから学習した
    TrainedFromManifests(TrainingReport),
    /// 画像収集から学習した
    TrainedFromScratch {
        manifests: Vec<ClassManifest>,
        report: TrainingReport,
    },
}

/// シードを決める（未指定なら生成してログに残す）
pub fn resolve_seed(configured: Option<u64>) -> u64 {
    match configured {
        Some(seed) => seed,
        None => {
            let seed = rand::thread_rng().gen();
            tracing::info!("シード未指定のため生成しました: {}", seed);
            seed
        }
    }
}

pub fn run_pipeline(config: &AppConfig) -> Result<PipelineOutcome> {
    let layout = config.layout();
    let model_dir = config.paths.model_dir.as_path();

    let gate = ModelGate::new(model_dir, &layout, config.acquisition.min_processed_images);
    let decision = gate.decide()?;

    match decision {
        GateDecision::ModelPresent(metadata) => {
            tracing::info!("学習済みモデルがあります: {}", model_dir.display());
            log_metadata_info(&metadata);
            Ok(PipelineOutcome::AlreadyTrained)
        }
        GateDecision::TrainFromManifests { processed_images } => {
            tracing::info!("処理済み画像 {} 枚を使って学習します", processed_images);
            let seed = resolve_seed(config.training.seed);
            let rows = read_manifests(&layout)?;
            let report = train_on_device(&rows, config, seed, model_dir)?;
            Ok(PipelineOutcome::TrainedFromManifests(report))
        }
        GateDecision::FullAcquisition => {
            let seed = resolve_seed(config.training.seed);
            let mut rng = StdRng::seed_from_u64(seed);

            let mut sources = Vec::with_capacity(ClassLabel::ALL.len());
            for label in ClassLabel::ALL {
                let urls = load_source_urls(&layout.source_path(label))?;
                tracing::info!("{}: URL {} 件", label, urls.len());
                sources.push((label, urls));
            }

            let builder = DatasetBuilder::new(
                layout.clone(),
                config.acquisition.clone(),
                config.training.image_size as u32,
            )?;
            let manifests = builder.build(&sources, &mut rng)?;

            // ワーカーは全て終了済み。書き出したマニフェストを読み直して学習する
            let rows = read_manifests(&layout)?;
            let report = train_on_device(&rows, config, seed, model_dir)?;
            Ok(PipelineOutcome::TrainedFromScratch { manifests, report })
        }
    }
}

/// 両クラスのマニフェストを連結して読む
fn read_manifests(layout: &DataLayout) -> Result<Vec<ManifestRow>> {
    let paths: Vec<_> = ClassLabel::ALL.iter().map(|l| layout.manifest_path(*l)).collect();
    let paths: Vec<&Path> = paths.iter().map(|p| p.as_path()).collect();
    let rows = load_manifests(&paths).context("Failed to load manifests")?;
    tracing::info!("マニフェスト: {} 行", rows.len());
    Ok(rows)
}

fn train_on_device(
    rows: &[ManifestRow],
    config: &AppConfig,
    seed: u64,
    model_dir: &Path,
) -> Result<TrainingReport> {
    let settings: &TrainingSettings = &config.training;
    match config.device_type {
        DeviceType::Wgpu => {
            let device = WgpuDevice::default();
            train_model::<Autodiff<Wgpu>>(rows, settings, seed, device, model_dir)
        }
        DeviceType::Cpu => {
            let device = NdArrayDevice::default();
            train_model::<Autodiff<NdArray>>(rows, settings, seed, device, model_dir)
        }
    }
}
