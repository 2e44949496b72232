use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 分類クラス（2クラスのみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    Cucumber,
    Moped,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 2] = [ClassLabel::Cucumber, ClassLabel::Moped];

    /// マニフェストの `y` 列に書き込む値
    pub fn y(self) -> u8 {
        match self {
            ClassLabel::Cucumber => 0,
            ClassLabel::Moped => 1,
        }
    }

    /// 画像ファイル名の接頭辞
    pub fn prefix(self) -> &'static str {
        match self {
            ClassLabel::Cucumber => "cucumber_",
            ClassLabel::Moped => "moped_",
        }
    }

    /// URL一覧のCSVファイル名（data ディレクトリ内）
    pub fn source_file(self) -> &'static str {
        match self {
            ClassLabel::Cucumber => "cucumber.csv",
            ClassLabel::Moped => "moped.csv",
        }
    }

    /// マニフェストのCSVファイル名（imgs ディレクトリ内）
    pub fn manifest_file(self) -> &'static str {
        match self {
            ClassLabel::Cucumber => "cucumbers2.csv",
            ClassLabel::Moped => "mopeds2.csv",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ClassLabel::Cucumber => "cucumber",
            ClassLabel::Moped => "moped",
        }
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// マニフェストの1行（処理済み画像のパスとラベル）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub uri: String,
    pub y: u8,
}

impl ManifestRow {
    pub fn new(uri: impl Into<String>, label: ClassLabel) -> Self {
        Self {
            uri: uri.into(),
            y: label.y(),
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.uri)
    }
}

/// データディレクトリ構成
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub data_dir: PathBuf,
    pub imgs_dir: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>, imgs_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            imgs_dir: imgs_dir.into(),
        }
    }

    pub fn source_path(&self, label: ClassLabel) -> PathBuf {
        self.data_dir.join(label.source_file())
    }

    pub fn manifest_path(&self, label: ClassLabel) -> PathBuf {
        self.imgs_dir.join(label.manifest_file())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.imgs_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.imgs_dir.join("processed")
    }
}
