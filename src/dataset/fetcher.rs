//! URLから画像を取得する

use image::{DynamicImage, ImageError};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use std::path::Path;
use std::time::Duration;

/// 画像取得の失敗理由
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[source] ImageError),

    #[error("failed to write image: {0}")]
    Write(#[source] ImageError),
}

impl FetchError {
    /// 書き込み先が存在しない（ディレクトリ未作成など）
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Write(ImageError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// 画像取得クライアント
///
/// TLS検証なし・リダイレクトなし・固定タイムアウト。
/// 内部のHTTPクライアントは接続プールを共有するのでワーカー間で使い回せる。
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .user_agent(format!("kurkkuvaimopo/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// URLから画像を取得してデコードする
    ///
    /// ステータスコードは見ない。本文が画像としてデコードできるかだけで判断する。
    pub fn fetch(&self, url: &str) -> Result<DynamicImage, FetchError> {
        let response = self.client.get(url).send()?;
        tracing::trace!("{} -> {}", url, response.status());

        let bytes = response.bytes()?;
        image::load_from_memory(&bytes).map_err(FetchError::Decode)
    }

    /// URLから画像を取得し、`dest` が指定されていれば保存する
    ///
    /// JPEGはアルファチャンネルを持てないためRGBに変換してから書き込む。
    pub fn fetch_to(&self, url: &str, dest: Option<&Path>) -> Result<DynamicImage, FetchError> {
        let img = self.fetch(url)?;

        if let Some(dest) = dest {
            DynamicImage::ImageRgb8(img.to_rgb8())
                .save(dest)
                .map_err(FetchError::Write)?;
        }

        Ok(img)
    }
}
