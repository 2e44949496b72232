//! モデル学習と評価

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::ml::ml_model::{
    class_names, load_and_normalize_image_with_size, model_from_bytes, Classifier, ModelConfig, CHANNELS,
};
use crate::model::{save_model_with_metadata, ModelMetadata, TrainingSettings};
use crate::types::ManifestRow;

/// マニフェスト行を学習用とテスト用に分割
///
/// シャッフル後、先頭 floor(n * (1 - test_ratio)) 件を学習用にする。層化はしない。
pub fn split_rows(rows: &[ManifestRow], test_ratio: f32, seed: u64) -> (Vec<ManifestRow>, Vec<ManifestRow>) {
    let mut rows = rows.to_vec();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);

    let test = rows.split_off(train_len(rows.len(), test_ratio));
    (rows, test)
}

/// 学習用の件数 floor(n * (1 - test_ratio))
///
/// 割合は1万分率の整数にしてから計算する（テスト側は切り上げ）。
pub fn train_len(n: usize, test_ratio: f32) -> usize {
    let test_bp = ((f64::from(test_ratio) * 10_000.0).round().max(0.0) as usize).min(10_000);
    n - (n * test_bp).div_ceil(10_000)
}

/// 学習データセット（正規化済みの画素を保持）
#[derive(Debug, Clone)]
pub struct SampleDataset {
    samples: Vec<SampleItem>,
}

impl SampleDataset {
    /// マニフェスト行の画像を全て読み込む
    ///
    /// 読めない画像が1枚でもあればそのパス付きでエラーを返す。
    pub fn load(rows: &[ManifestRow], image_size: usize) -> Result<Self> {
        let samples = rows
            .iter()
            .map(|row| {
                let pixels = load_and_normalize_image_with_size(row.path(), image_size)
                    .with_context(|| format!("Failed to load training image {}", row.uri))?;
                Ok(SampleItem {
                    pixels: Arc::new(pixels),
                    label: row.y,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { samples })
    }
}

/// データセットアイテム
#[derive(Clone, Debug)]
pub struct SampleItem {
    pub pixels: Arc<Vec<f32>>,
    pub label: u8,
}

impl Dataset<SampleItem> for SampleDataset {
    fn get(&self, index: usize) -> Option<SampleItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
#[derive(Clone)]
pub struct SampleBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> SampleBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct SampleBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, SampleItem, SampleBatch<B>> for SampleBatcher<B> {
    fn batch(&self, items: Vec<SampleItem>, _device: &B::Device) -> SampleBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * CHANNELS * image_size * image_size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, CHANNELS, image_size, image_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        SampleBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<SampleBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: SampleBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<SampleBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: SampleBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 評価結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub seed: u64,
    pub train_samples: usize,
    pub test_samples: usize,
    pub test: Option<Evaluation>,
    pub model_path: PathBuf,
}

/// テストデータでモデルを評価（損失はサンプル数で加重平均）
pub fn evaluate<B: Backend>(
    model: &Classifier<B>,
    dataset: SampleDataset,
    settings: &TrainingSettings,
    device: &B::Device,
) -> Evaluation {
    let dataloader = DataLoaderBuilder::new(SampleBatcher::<B>::new(device.clone(), settings.image_size))
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers.max(1))
        .build(dataset);

    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;
    for batch in dataloader.iter() {
        let batch_size = batch.targets.dims()[0];
        if batch_size == 0 {
            continue;
        }
        let item = model.forward_classification(batch.images, batch.targets);
        let hits = item
            .output
            .argmax(1)
            .reshape([batch_size])
            .equal(item.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        loss_sum += item.loss.into_scalar().elem::<f64>() * batch_size as f64;
        correct += hits as usize;
        seen += batch_size;
    }

    if seen == 0 {
        return Evaluation {
            loss: 0.0,
            accuracy: 0.0,
            samples: 0,
        };
    }
    Evaluation {
        loss: loss_sum / seen as f64,
        accuracy: correct as f64 / seen as f64,
        samples: seen,
    }
}

/// モデル学習を実行
///
/// 1. 85/15 に分割し、全画像を読み込む
/// 2. Learnerで `num_epochs` エポック学習（Adam + バイナリクロスエントロピー）
/// 3. テスト用データで評価
/// 4. モデルディレクトリに保存
pub fn train_model<B: AutodiffBackend>(
    rows: &[ManifestRow],
    settings: &TrainingSettings,
    seed: u64,
    device: B::Device,
    model_dir: &Path,
) -> Result<TrainingReport> {
    if rows.is_empty() {
        anyhow::bail!("no training samples: every manifest is empty");
    }

    let (rows_train, rows_test) = split_rows(rows, settings.test_ratio, seed);
    let train_samples = rows_train.len();
    let test_samples = rows_test.len();

    tracing::info!("学習データ: {} 枚 / テストデータ: {} 枚 (シード {})", train_samples, test_samples, seed);
    if train_samples == 0 {
        anyhow::bail!("training partition is empty ({} samples in total)", rows.len());
    }

    let dataset_train = SampleDataset::load(&rows_train, settings.image_size)?;
    let dataset_test = SampleDataset::load(&rows_test, settings.image_size)?;

    let dataloader_train = DataLoaderBuilder::new(SampleBatcher::<B>::new(device.clone(), settings.image_size))
        .batch_size(settings.batch_size)
        .shuffle(seed)
        .num_workers(settings.num_workers.max(1))
        .build(dataset_train);

    let dataloader_valid =
        DataLoaderBuilder::new(SampleBatcher::<B::InnerBackend>::new(device.clone(), settings.image_size))
            .batch_size(settings.batch_size)
            .num_workers(settings.num_workers.max(1))
            .build(dataset_test.clone());

    let model_config = ModelConfig::new().with_image_size(settings.image_size);
    let model: Classifier<B> = model_config.init::<B>(&device);

    // Learnerのログとメトリクスは実行ごとの一時ディレクトリへ
    let artifact_dir = std::env::temp_dir().join(format!("kurkkuvaimopo-train-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&artifact_dir)
        .with_context(|| format!("Failed to create {}", artifact_dir.display()))?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    tracing::info!(
        "学習を開始します (エポック数: {}, バッチサイズ: {}, 学習率: {})",
        settings.num_epochs,
        settings.batch_size,
        settings.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let trained = learner.fit(dataloader_train, dataloader_valid).model;

    if let Err(e) = std::fs::remove_dir_all(&artifact_dir) {
        tracing::debug!("一時ディレクトリを削除できません {}: {}", artifact_dir.display(), e);
    }

    // DefaultFileRecorderと同じf32精度でバイト列に書き出す
    let model_binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(trained.into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to serialize model weights: {:?}", e))?;

    // 評価は推論モード（BatchNormは移動平均を使用）
    let test = if test_samples > 0 {
        let inference_model = model_from_bytes::<B::InnerBackend>(&model_config, model_binary.clone(), &device)
            .context("Failed to reload trained weights for evaluation")?;
        let evaluation = evaluate::<B::InnerBackend>(&inference_model, dataset_test, settings, &device);
        tracing::info!(
            "テスト: loss={:.4}, accuracy={:.2}% ({} 枚)",
            evaluation.loss,
            evaluation.accuracy * 100.0,
            evaluation.samples
        );
        Some(evaluation)
    } else {
        tracing::warn!("テストデータが0枚のため評価をスキップします");
        None
    };

    if let (Some(min), Some(test)) = (settings.min_test_accuracy, test) {
        if test.accuracy < min {
            anyhow::bail!(
                "test accuracy {:.4} is below the configured minimum {:.4}; model not saved",
                test.accuracy,
                min
            );
        }
    }

    let mut metadata = ModelMetadata::new(
        class_names(),
        settings.image_size as u32,
        settings.num_epochs as u32,
        settings.batch_size as u32,
        settings.learning_rate,
        seed,
        train_samples,
        test_samples,
    );
    if let Some(test) = test {
        metadata = metadata.with_evaluation(test.loss, test.accuracy);
    }

    let model_path = save_model_with_metadata(model_dir, &metadata, &model_binary)?;
    tracing::info!(
        "モデルを保存しました: {} ({:.2} MB)",
        model_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    Ok(TrainingReport {
        seed,
        train_samples,
        test_samples,
        test,
        model_path,
    })
}
