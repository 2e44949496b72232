//! モデルとメタデータの永続化
//!
//! モデルディレクトリ内の `classifier.tar.gz` にモデルとメタデータを1ファイルに統合して保存・読み込みします。
//! このファイルの有無が「学習済みかどうか」を決める唯一の情報源です。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス、入力サイズ、評価結果など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

/// モデルディレクトリ内のバンドルファイル名
pub const MODEL_BUNDLE_NAME: &str = "classifier.tar.gz";

/// モデルディレクトリからバンドルファイルのパスを得る
pub fn bundle_path(model_dir: &Path) -> PathBuf {
    model_dir.join(MODEL_BUNDLE_NAME)
}

/// モデルディレクトリの状態
#[derive(Debug)]
pub enum ModelState {
    /// 読み込み可能なモデルが存在する
    Present(ModelMetadata),
    /// モデルが存在しない
    Missing,
    /// ファイルはあるが読み込めない
    Unreadable(anyhow::Error),
}

impl ModelState {
    pub fn is_present(&self) -> bool {
        matches!(self, ModelState::Present(_))
    }
}

/// モデルディレクトリを調べる
pub fn inspect_model(model_dir: &Path) -> ModelState {
    let path = bundle_path(model_dir);
    if !path.is_file() {
        return ModelState::Missing;
    }

    match load_metadata(&path) {
        Ok(metadata) => ModelState::Present(metadata),
        Err(e) => ModelState::Unreadable(e),
    }
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
///
/// 一時ファイルに書き出してからリネームするため、途中で失敗しても不完全なバンドルは残らない。
pub fn save_model_with_metadata(
    model_dir: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    std::fs::create_dir_all(model_dir)
        .context(format!("Failed to create model directory: {:?}", model_dir))?;

    let tar_gz_path = bundle_path(model_dir);
    let partial_path = tar_gz_path.with_extension("partial");

    let tar_gz_file = File::create(&partial_path)
        .context(format!("Failed to create tar.gz file: {:?}", partial_path))?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    // メタデータをJSONとして追加
    let json_str = metadata.to_json_string()?;
    let json_bytes = json_str.as_bytes();

    let mut header = tar::Header::new_gnu();
    header.set_path("metadata.json")?;
    header.set_size(json_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar_builder
        .append(&header, json_bytes)
        .context("Failed to add metadata.json to tar")?;

    // モデルバイナリを追加
    let mut header = tar::Header::new_gnu();
    header.set_path("model.bin")?;
    header.set_size(model_binary.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar_builder
        .append(&header, model_binary)
        .context("Failed to add model.bin to tar")?;

    // tarアーカイブとgzipストリームを完成させる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    std::fs::rename(&partial_path, &tar_gz_path)
        .context(format!("Failed to move model bundle into place: {:?}", tar_gz_path))?;

    Ok(tar_gz_path)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    // metadata.jsonを探す
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        if path.to_str() == Some("metadata.json") {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(anyhow::anyhow!("metadata.json not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    // 両方のファイルを読み込む
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some("metadata.json") => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some("model.bin") => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出す
pub fn log_metadata_info(metadata: &ModelMetadata) {
    tracing::info!("クラス: {}", metadata.class_labels.join(", "));
    tracing::info!(
        "モデル入力サイズ: {}x{}",
        metadata.model_input_size,
        metadata.model_input_size
    );
    tracing::info!(
        "学習: {} エポック, シード {}, 学習 {} 枚 / テスト {} 枚",
        metadata.num_epochs,
        metadata.seed,
        metadata.train_samples,
        metadata.test_samples
    );
    if let (Some(loss), Some(accuracy)) = (metadata.test_loss, metadata.test_accuracy) {
        tracing::info!("テスト: loss={:.4}, accuracy={:.2}%", loss, accuracy * 100.0);
    }
    tracing::info!("学習日時: {}", metadata.trained_at);
}
