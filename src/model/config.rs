//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、パス、画像収集、学習、推論サーバーの設定をJSON形式で保存・読み込みします。
//! 優先順位: デフォルト < 設定ファイル < 環境変数 (`MODEL_PATH`, `PORT`) < CLI引数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::DataLayout;

/// モデルディレクトリを上書きする環境変数
pub const MODEL_PATH_ENV: &str = "MODEL_PATH";
/// 推論サーバーのポートを上書きする環境変数
pub const PORT_ENV: &str = "PORT";

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Ok(DeviceType::Wgpu),
            "cpu" | "ndarray" => Ok(DeviceType::Cpu),
            other => Err(format!("unknown device type: {other} (expected cpu or wgpu)")),
        }
    }
}

/// ファイルシステム上の配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// URL一覧CSV (cucumber.csv, moped.csv) のディレクトリ
    pub data_dir: PathBuf,
    /// raw/processed 画像とマニフェストのディレクトリ
    pub imgs_dir: PathBuf,
    /// 学習済みモデルのディレクトリ
    pub model_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            imgs_dir: PathBuf::from("./imgs"),
            model_dir: PathBuf::from("./model/model"),
        }
    }
}

/// 画像収集設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// クラスごとにサンプリングするURL数
    pub sample_size: usize,
    /// 1リクエストあたりのタイムアウト（秒）
    pub fetch_timeout_secs: u64,
    /// ワーカー数（未指定ならCPU数）
    #[serde(default)]
    pub workers: Option<usize>,
    /// この枚数を超える処理済み画像があれば収集をスキップする
    pub min_processed_images: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_size: 213,
            fetch_timeout_secs: 5,
            workers: None,
            min_processed_images: 50,
        }
    }
}

impl AcquisitionSettings {
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// データローダーのワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（未指定なら実行ごとに生成してログとメタデータに残す）
    #[serde(default)]
    pub seed: Option<u64>,
    /// テストデータの割合
    pub test_ratio: f32,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// テスト精度がこれを下回るとモデルを保存しない
    #[serde(default)]
    pub min_test_accuracy: Option<f64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 32,
            num_workers: 1,
            learning_rate: 1e-3,
            seed: None,
            test_ratio: 0.15,
            image_size: 128,
            min_test_accuracy: None,
        }
    }
}

/// 推論サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub port: u16,
    /// モデル待機時のポーリング間隔（秒）
    pub model_poll_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 5000,
            model_poll_secs: 5,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パス（なければデフォルトパス）から読み込む。存在しない場合はデフォルト設定を返す
    ///
    /// 明示的に指定されたファイルが読めない場合はエラーにする。
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            let config = Self::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e))?;
            tracing::info!("設定ファイルを読み込みました: {}", path.display());
            return Ok(config);
        }

        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    Ok(config)
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Ok(Self::default())
                }
            }
        } else {
            tracing::debug!("設定ファイルが存在しません。デフォルト設定を使用します");
            Ok(Self::default())
        }
    }

    /// 環境変数による上書きを適用する
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model_dir) = lookup(MODEL_PATH_ENV).filter(|v| !v.is_empty()) {
            self.paths.model_dir = PathBuf::from(model_dir);
        }
        if let Some(port) = lookup(PORT_ENV) {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("{}={} は不正なポート番号のため無視します", PORT_ENV, port),
            }
        }
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.paths.data_dir, &self.paths.imgs_dir)
    }

    /// 設定情報をログに出す
    pub fn log_summary(&self) {
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!(
            "データ: {} / 画像: {} / モデル: {}",
            self.paths.data_dir.display(),
            self.paths.imgs_dir.display(),
            self.paths.model_dir.display()
        );
        tracing::debug!(
            "収集: {}件/クラス, タイムアウト {}秒, ワーカー {}",
            self.acquisition.sample_size,
            self.acquisition.fetch_timeout_secs,
            self.acquisition.worker_count()
        );
        tracing::debug!(
            "学習: エポック {}, バッチ {}, 学習率 {}, テスト割合 {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.test_ratio
        );
    }
}
