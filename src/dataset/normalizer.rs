//! 画像の正規化（リサイズ + グレースケール化）

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageError};
use std::path::{Path, PathBuf};

/// 正規化後の画像サイズ（正方形）
pub const PROCESSED_SIZE: u32 = 128;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
}

impl NormalizeError {
    pub fn is_not_found(&self) -> bool {
        let source = match self {
            NormalizeError::Read { source, .. } | NormalizeError::Write { source, .. } => source,
        };
        matches!(source, ImageError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// デコード済み画像を `size`x`size` のグレースケールに変換する
///
/// 学習データ作成と推論サーバーで同じ変換を使う。
pub fn normalize_image(img: &DynamicImage, size: u32) -> GrayImage {
    img.resize_exact(size, size, FilterType::Triangle).to_luma8()
}

/// 保存済みの元画像を読み込んで正規化する
pub fn normalize(raw_path: &Path, size: u32) -> Result<GrayImage, NormalizeError> {
    let img = image::open(raw_path).map_err(|source| NormalizeError::Read {
        path: raw_path.to_path_buf(),
        source,
    })?;

    Ok(normalize_image(&img, size))
}

/// 正規化済み画像を書き込む
pub fn write_processed(img: &GrayImage, dest: &Path) -> Result<(), NormalizeError> {
    img.save(dest).map_err(|source| NormalizeError::Write {
        path: dest.to_path_buf(),
        source,
    })
}
