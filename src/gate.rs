//! 学習ジョブの入口判定
//!
//! モデルがあれば何もしない。処理済み画像とマニフェストが揃っていれば学習だけ行う。
//! どちらでもなければURL一覧から画像収集を始める。

use std::path::{Path, PathBuf};

use crate::model::{inspect_model, ModelMetadata, ModelState};
use crate::types::{ClassLabel, DataLayout};

/// 判定結果
#[derive(Debug)]
pub enum GateDecision {
    /// 学習済みモデルがある
    ModelPresent(ModelMetadata),
    /// 既存マニフェストから学習のみ行う
    TrainFromManifests { processed_images: usize },
    /// 画像収集から行う
    FullAcquisition,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("no model and no source tables: missing {}", format_paths(.missing))]
    MissingSources { missing: Vec<PathBuf> },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct ModelGate<'a> {
    model_dir: &'a Path,
    layout: &'a DataLayout,
    min_processed_images: usize,
}

impl<'a> ModelGate<'a> {
    pub fn new(model_dir: &'a Path, layout: &'a DataLayout, min_processed_images: usize) -> Self {
        Self {
            model_dir,
            layout,
            min_processed_images,
        }
    }

    pub fn decide(&self) -> Result<GateDecision, GateError> {
        match inspect_model(self.model_dir) {
            ModelState::Present(metadata) => return Ok(GateDecision::ModelPresent(metadata)),
            ModelState::Missing => {}
            ModelState::Unreadable(e) => {
                // 壊れたバンドルは無いものとして作り直す
                tracing::warn!("モデルを読み込めません ({}): {:#}", self.model_dir.display(), e);
            }
        }

        let manifests_exist = ClassLabel::ALL
            .iter()
            .all(|label| self.layout.manifest_path(*label).is_file());
        if manifests_exist {
            let processed_images = count_files(&self.layout.processed_dir());
            if processed_images > self.min_processed_images {
                return Ok(GateDecision::TrainFromManifests { processed_images });
            }
            tracing::info!(
                "処理済み画像が {} 枚しかないため収集からやり直します (必要: {} 枚超)",
                processed_images,
                self.min_processed_images
            );
        }

        let missing: Vec<PathBuf> = ClassLabel::ALL
            .iter()
            .map(|label| self.layout.source_path(*label))
            .filter(|path| !path.is_file())
            .collect();
        if !missing.is_empty() {
            return Err(GateError::MissingSources { missing });
        }

        Ok(GateDecision::FullAcquisition)
    }
}

/// ディレクトリ直下のファイル数（存在しなければ0）
pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}
