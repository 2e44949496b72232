//! モデルメタデータの定義
//!
//! tar.gz形式でモデルと一緒に保存され、推論サーバーが入力サイズとクラスを復元するのに使います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラスラベル（インデックス = y）
    /// 例: ["cucumber", "moped"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、通常128）
    pub model_input_size: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    pub batch_size: u32,

    pub learning_rate: f64,

    /// データ分割・シャッフルに使用したシード
    pub seed: u64,

    /// 学習/テストに使ったサンプル数
    pub train_samples: usize,
    pub test_samples: usize,

    /// テストデータでの評価結果
    #[serde(default)]
    pub test_loss: Option<f64>,
    #[serde(default)]
    pub test_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        model_input_size: u32,
        num_epochs: u32,
        batch_size: u32,
        learning_rate: f64,
        seed: u64,
        train_samples: usize,
        test_samples: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            model_input_size,
            num_epochs,
            batch_size,
            learning_rate,
            seed,
            train_samples,
            test_samples,
            test_loss: None,
            test_accuracy: None,
            trained_at,
        }
    }

    /// 評価結果を記録
    pub fn with_evaluation(mut self, loss: f64, accuracy: f64) -> Self {
        self.test_loss = Some(loss);
        self.test_accuracy = Some(accuracy);
        self
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
