//! 機械学習モデルの共通定義
//!
//! キュウリ/モペット二値分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::BinaryCrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, Relu,
    },
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::DynamicImage;

use crate::types::ClassLabel;

/// 入力チャンネル数（グレースケールをRGBに複製）
pub const CHANNELS: usize = 3;

/// クラス名の定義（インデックス = y）
pub fn class_names() -> Vec<String> {
    ClassLabel::ALL.iter().map(|l| l.name().to_string()).collect()
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 2段の畳み込み+プーリング後の一辺の長さ
    ///
    /// Conv1 (4x4, no padding): size -> size - 3
    /// Pool1 (3x3, stride 3): -> (size - 3) / 3
    /// Conv2 (3x3, no padding): -> ((size - 3) / 3) - 2
    /// Pool2 (3x3, stride 3): -> (((size - 3) / 3) - 2) / 3
    pub fn feature_map_size(&self) -> usize {
        let after_conv1 = self.image_size.saturating_sub(3);
        let after_pool1 = after_conv1 / 3;
        let after_conv2 = after_pool1.saturating_sub(2);
        after_conv2 / 3
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        let feature_map_size = self.feature_map_size();
        assert!(
            feature_map_size > 0,
            "input size too small: {} (at least 14x14 required)",
            self.image_size
        );

        // 特徴次元 d = 64チャネル * feature_map_size * feature_map_size
        let d = 64 * feature_map_size * feature_map_size;
        tracing::debug!(
            "入力 {}x{} -> 特徴マップ 64x{}x{} -> Flatten {}",
            self.image_size,
            self.image_size,
            feature_map_size,
            feature_map_size,
            d
        );

        Classifier {
            conv1: Conv2dConfig::new([CHANNELS, 64], [4, 4]).init(device),
            pool1: MaxPool2dConfig::new([3, 3]).with_strides([3, 3]).init(),
            conv2: Conv2dConfig::new([64, 64], [3, 3]).init(device),
            pool2: MaxPool2dConfig::new([3, 3]).with_strides([3, 3]).init(),

            fc1: LinearConfig::new(d, 128).init(device),
            fc2: LinearConfig::new(128, 256).init(device),
            norm: BatchNormConfig::new(256).init(device),
            fc3: LinearConfig::new(256, 128).init(device),
            output: LinearConfig::new(128, 1).init(device),

            activation: Relu::new(),
        }
    }
}

/// 二値分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 4x4 (64) -> MaxPool 3x3
/// - Conv 3x3 (64) + ReLU -> MaxPool 3x3
/// - Flatten
/// - FC 128 + ReLU -> FC 256 -> BatchNorm -> FC 128 + ReLU
/// - FC 1 -> Sigmoid (y=1 の確率)
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,

    fc1: Linear<B>,
    fc2: Linear<B>,
    norm: BatchNorm<B>,
    fc3: Linear<B>,
    output: Linear<B>,

    activation: Relu,
}

impl<B: Backend> Classifier<B> {
    /// 順伝播（シグモイド前のロジット）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - ロジット [batch_size, 1]
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        // Conv1は活性化関数なし
        let x = self.conv1.forward(images);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.fc2.forward(x);
        let x = self.norm.forward(x);
        let x = self.fc3.forward(x);
        let x = self.activation.forward(x);

        self.output.forward(x)
    }

    /// 順伝播（y=1 の確率）[batch_size, 1]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(images))
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 出力は2列 [0, ロジット] にして返す。argmax が確率 0.5 のしきい値判定と一致するので、
    /// 精度メトリクスをそのまま使える。
    ///
    /// # 戻り値
    /// - ClassificationOutput（バイナリクロスエントロピー損失、出力 [batch_size, 2]、ターゲット）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let logits = self.forward_logits(images);
        let loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&logits.device())
            .forward(logits.clone(), targets.clone().unsqueeze_dim(1));

        let output = Tensor::cat(vec![logits.zeros_like(), logits], 1);
        ClassificationOutput::new(loss, output, targets)
    }
}

/// バイト列（BinBytesRecorder形式）から重みを復元したモデルを作る
pub fn model_from_bytes<B: Backend>(
    config: &ModelConfig,
    weights: Vec<u8>,
    device: &B::Device,
) -> anyhow::Result<Classifier<B>> {
    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(weights, device)
        .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
    Ok(config.init::<B>(device).load_record(record))
}

/// 画像をモデル入力に変換
///
/// RGBの各チャンネルを [0, 1] にスケールし (C, H, W) の順で平坦化する。
/// グレースケール画像は3チャンネルに複製される。
pub fn image_to_input(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut data = Vec::with_capacity(CHANNELS * (width * height) as usize);

    for channel in 0..CHANNELS {
        for y in 0..height {
            for x in 0..width {
                let pixel = rgb.get_pixel(x, y);
                data.push(pixel[channel] as f32 / 255.0);
            }
        }
    }

    data
}

/// 画像を読み込んで正規化（サイズ指定版）
///
/// 学習データは正規化済みのはずなので、サイズが違えばエラーにする。
pub fn load_and_normalize_image_with_size(
    path: &std::path::Path,
    expected_size: usize,
) -> anyhow::Result<Vec<f32>> {
    let img = image::open(path)?;
    let (width, height) = (img.width(), img.height());

    if width != expected_size as u32 || height != expected_size as u32 {
        anyhow::bail!(
            "unexpected image size {}x{} (expected {}x{}): {}",
            width,
            height,
            expected_size,
            expected_size,
            path.display()
        );
    }

    Ok(image_to_input(&img))
}
