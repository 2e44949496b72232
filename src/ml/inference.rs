//! モデル推論機能

use anyhow::{Context, Result};
use std::path::Path;

use burn::tensor::{backend::Backend, Tensor};
use image::DynamicImage;

use crate::dataset::normalize_image;
use crate::ml::ml_model::{image_to_input, model_from_bytes, Classifier, ModelConfig, CHANNELS};
use crate::model::{bundle_path, load_model_with_metadata, log_metadata_info, InferenceConfig};

/// 画像1枚からスコア（y=1 の確率）を返すもの
pub trait Predictor: Send {
    fn predict_image(&self, img: &DynamicImage) -> Result<f32>;

    /// エンコード済み画像バイト列からスコアを返す
    fn predict_bytes(&self, bytes: &[u8]) -> Result<f32> {
        let img = image::load_from_memory(bytes).context("Failed to decode uploaded image")?;
        self.predict_image(&img)
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: Classifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルディレクトリから推論エンジンを初期化
    pub fn load(model_dir: &Path, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(&bundle_path(model_dir))?;
        log_metadata_info(&metadata);

        let config = InferenceConfig::from_metadata(&metadata);
        let model_config = ModelConfig::new().with_image_size(config.model_input_size as usize);
        let model = model_from_bytes::<B>(&model_config, model_binary, &device)?;

        Ok(Self::from_model(model, config, device))
    }

    pub fn from_model(model: Classifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// 学習時と同じ正規化（リサイズ→グレースケール）をかけてスコアを計算
    pub fn score(&self, img: &DynamicImage) -> Result<f32> {
        let size = self.config.model_input_size;
        let normalized = DynamicImage::ImageLuma8(normalize_image(img, size));
        let input = image_to_input(&normalized);

        let size = size as usize;
        let tensor = Tensor::<B, 1>::from_floats(input.as_slice(), &self.device)
            .reshape([1, CHANNELS, size, size]);

        let output = self.model.forward(tensor);
        let score = output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("empty model output"))?;

        tracing::debug!(
            "スコア {:.4} ({})",
            score,
            self.config.label_for_score(score).unwrap_or("?")
        );
        Ok(score)
    }
}

impl<B: Backend> Predictor for InferenceEngine<B>
where
    B::Device: Send,
    Classifier<B>: Send,
{
    fn predict_image(&self, img: &DynamicImage) -> Result<f32> {
        self.score(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::class_names;
    use crate::model::{save_model_with_metadata, ModelMetadata};
    use burn::backend::NdArray;
    use burn::module::Module;
    use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn untrained_engine() -> InferenceEngine<TestBackend> {
        let device = Default::default();
        let model = ModelConfig::new().with_image_size(32).init::<TestBackend>(&device);
        let metadata = ModelMetadata::new(class_names(), 32, 1, 4, 1e-3, 0, 0, 0);
        InferenceEngine::from_model(model, InferenceConfig::from_metadata(&metadata), device)
    }

    #[test]
    fn test_score_in_unit_interval() {
        let engine = untrained_engine();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 90, Rgb([10, 200, 30])));
        let score = engine.predict_image(&img).unwrap();
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_predict_bytes_rejects_garbage() {
        let engine = untrained_engine();
        assert!(engine.predict_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn test_load_roundtrip_from_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = ModelConfig::new().with_image_size(32).init::<TestBackend>(&device);
        let bytes = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();
        let metadata = ModelMetadata::new(class_names(), 32, 1, 4, 1e-3, 0, 0, 0);
        save_model_with_metadata(dir.path(), &metadata, &bytes).unwrap();

        let engine = InferenceEngine::<TestBackend>::load(dir.path(), device).unwrap();
        assert_eq!(engine.config().model_input_size, 32);

        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])));
        let score = engine.score(&img).unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
}
