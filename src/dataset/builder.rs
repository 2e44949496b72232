//! 学習データセットの構築
//!
//! クラスごとにURLをサンプリングし、スレッドプールで取得→正規化を行ってマニフェストを書き出す。

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::csv_loader::write_manifest;
use crate::dataset::fetcher::{FetchError, ImageFetcher};
use crate::dataset::normalizer::{self, NormalizeError};
use crate::model::AcquisitionSettings;
use crate::types::{ClassLabel, DataLayout, ManifestRow};

/// 1サンプルの処理失敗
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl SampleError {
    pub fn is_not_found(&self) -> bool {
        match self {
            SampleError::Fetch(e) => e.is_not_found(),
            SampleError::Normalize(e) => e.is_not_found(),
        }
    }
}

/// クラスごとの収集結果
#[derive(Debug, Clone)]
pub struct ClassManifest {
    pub label: ClassLabel,
    pub requested: usize,
    pub rows: Vec<ManifestRow>,
    pub manifest_path: PathBuf,
}

impl ClassManifest {
    pub fn failed(&self) -> usize {
        self.requested - self.rows.len()
    }
}

/// URLをランダムに最大 `n` 件サンプリングする（重複なし）
pub fn sample_urls<R: Rng + ?Sized>(urls: &[String], n: usize, rng: &mut R) -> Vec<String> {
    urls.choose_multiple(rng, n).cloned().collect()
}

/// データセットビルダー
pub struct DatasetBuilder {
    fetcher: ImageFetcher,
    layout: DataLayout,
    settings: AcquisitionSettings,
    image_size: u32,
}

impl DatasetBuilder {
    pub fn new(layout: DataLayout, settings: AcquisitionSettings, image_size: u32) -> Result<Self> {
        let fetcher = ImageFetcher::new(Duration::from_secs(settings.fetch_timeout_secs))
            .context("Failed to build HTTP client")?;

        Ok(Self {
            fetcher,
            layout,
            settings,
            image_size,
        })
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// raw/processed ディレクトリを作成する
    pub fn prepare_dirs(&self) -> Result<()> {
        for dir in [self.layout.raw_dir(), self.layout.processed_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                tracing::debug!("ディレクトリを作成しました: {}", dir.display());
            }
        }
        Ok(())
    }

    /// 1件のURLを取得→正規化し、マニフェスト行を返す
    pub fn process_sample(&self, label: ClassLabel, url: &str) -> Result<ManifestRow, SampleError> {
        let image_name = format!("{}{}.jpg", label.prefix(), Uuid::new_v4());

        let raw_path = self.layout.raw_dir().join(&image_name);
        self.fetcher.fetch_to(url, Some(&raw_path))?;

        let processed = normalizer::normalize(&raw_path, self.image_size)?;
        let processed_path = self.layout.processed_dir().join(&image_name);
        normalizer::write_processed(&processed, &processed_path)?;

        Ok(ManifestRow::new(processed_path.to_string_lossy(), label))
    }

    /// 1クラス分のURLを `worker_count()` 本のスレッドで並列に処理する
    ///
    /// 失敗したURLは行を作らずに捨てる。戻る時点で全ワーカーは終了している。
    pub fn build_class(&self, label: ClassLabel, urls: Vec<String>) -> Result<Vec<ManifestRow>> {
        let total = urls.len();
        let progress = class_progress_bar(label, total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.worker_count().clamp(1, total.max(1)))
            .build()
            .context("Failed to create thread pool")?;

        let results: Vec<(String, Result<ManifestRow, SampleError>)> = pool.install(|| {
            urls.into_par_iter()
                .map(|url| {
                    let result = self.process_sample(label, &url);
                    progress.inc(1);
                    (url, result)
                })
                .collect()
        });
        progress.finish_and_clear();

        let mut rows = Vec::with_capacity(total);
        for (url, result) in results {
            match result {
                Ok(row) => rows.push(row),
                Err(e) if e.is_not_found() => tracing::warn!("{}: {}", url, e),
                Err(e) => tracing::debug!("スキップ {}: {}", url, e),
            }
        }

        tracing::info!("{}: {}/{} 枚を取得しました", label, rows.len(), total);
        Ok(rows)
    }

    /// 両クラスのサンプリング・取得・マニフェスト書き出しを行う
    pub fn build<R: Rng + ?Sized>(
        &self,
        sources: &[(ClassLabel, Vec<String>)],
        rng: &mut R,
    ) -> Result<Vec<ClassManifest>> {
        self.prepare_dirs()?;

        let mut manifests = Vec::with_capacity(sources.len());
        for (label, urls) in sources {
            let sample = sample_urls(urls, self.settings.sample_size, rng);
            let requested = sample.len();
            tracing::info!("{} を収集しています... ({} 件)", label, requested);

            let rows = self.build_class(*label, sample)?;

            let manifest_path = self.layout.manifest_path(*label);
            write_manifest(&manifest_path, &rows)?;

            manifests.push(ClassManifest {
                label: *label,
                requested,
                rows,
                manifest_path,
            });
        }

        Ok(manifests)
    }
}

fn class_progress_bar(label: ClassLabel, total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:30}] {pos}/{len} ({eta})")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(format!("Gathering {}s...", label));
    pb
}
