//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータから推論に必要な情報を取得します。

use crate::model::model_metadata::ModelMetadata;

/// シグモイド出力をクラスに振り分けるしきい値
pub const DECISION_THRESHOLD: f32 = 0.5;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// 全クラスラベル（インデックス = y）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub model_input_size: u32,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            model_input_size: metadata.model_input_size,
        }
    }

    /// シグモイド出力からクラスラベルを取得
    ///
    /// 出力は y=1 の確率なので、しきい値以上ならインデックス1。
    pub fn label_for_score(&self, score: f32) -> Option<&str> {
        let index = usize::from(score >= DECISION_THRESHOLD);
        self.class_labels.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_for_score() {
        let config = InferenceConfig {
            class_labels: vec!["cucumber".to_string(), "moped".to_string()],
            model_input_size: 128,
        };
        assert_eq!(config.label_for_score(0.1), Some("cucumber"));
        assert_eq!(config.label_for_score(0.5), Some("moped"));
        assert_eq!(config.label_for_score(0.97), Some("moped"));
    }
}
