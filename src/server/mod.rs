//! 推論サーバー
//!
//! モデルファイルが置かれるまで待ってから読み込み、HTTPで分類を提供します。

pub mod errors;
pub mod routes;

pub use errors::ServeError;
pub use routes::{router, SharedPredictor, IMAGE_FIELD};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use burn::backend::{NdArray, Wgpu};
use burn_ndarray::NdArrayDevice;
use burn_wgpu::WgpuDevice;

use crate::ml::{InferenceEngine, Predictor};
use crate::model::{bundle_path, AppConfig, DeviceType};

/// モデルの置き場所（モデルディレクトリの親）が存在するか確認する
pub fn check_model_volume(model_dir: &Path) -> Result<(), ServeError> {
    let volume = model_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if volume.is_dir() {
        Ok(())
    } else {
        Err(ServeError::NoModelVolume(volume.display().to_string()))
    }
}

/// 推論エンジンを読み込む（推論時はAutodiffなし）
pub fn load_predictor(model_dir: &Path, device_type: DeviceType) -> Result<Box<dyn Predictor>> {
    let predictor: Box<dyn Predictor> = match device_type {
        DeviceType::Wgpu => Box::new(InferenceEngine::<Wgpu>::load(model_dir, WgpuDevice::default())?),
        DeviceType::Cpu => Box::new(InferenceEngine::<NdArray>::load(model_dir, NdArrayDevice::default())?),
    };
    Ok(predictor)
}

/// モデルを読み込めるまで `poll_interval` ごとに読み込みを試す
///
/// 置かれていない場合も、書き込み途中などで読めない場合も待ち続ける。待機中のログは最初の1回だけ出す。
pub async fn wait_for_model(
    model_dir: &Path,
    device_type: DeviceType,
    poll_interval: Duration,
) -> Result<Box<dyn Predictor>> {
    let mut announced = false;
    loop {
        let load_dir = model_dir.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || load_predictor(&load_dir, device_type))
            .await
            .context("model loading task failed")?;

        match loaded {
            Ok(predictor) => return Ok(predictor),
            Err(e) if bundle_path(model_dir).exists() => {
                tracing::debug!("モデルをまだ読み込めません: {:#}", e)
            }
            Err(_) => {}
        }

        if !announced {
            tracing::info!("モデルを待っています: {}", model_dir.display());
            announced = true;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// サーバーを起動し、Ctrl-C / SIGTERM まで待ち受ける
pub async fn serve(config: AppConfig) -> Result<()> {
    let model_dir = config.paths.model_dir.clone();
    check_model_volume(&model_dir)?;

    let device_type = config.device_type;
    let poll_interval = Duration::from_secs(config.server.model_poll_secs.max(1));
    let predictor = wait_for_model(&model_dir, device_type, poll_interval).await?;
    tracing::info!("モデルを読み込みました: {} ({})", model_dir.display(), device_type);

    let app = router(predictor);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("待ち受けを開始しました: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("サーバーを停止しました");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Ctrl-Cハンドラーを登録できません: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERMハンドラーを登録できません: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("停止シグナルを受信しました");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{class_names, ModelConfig};
    use crate::model::{save_model_with_metadata, ModelMetadata};

    #[test]
    fn test_missing_volume() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("missing").join("model");
        assert!(matches!(check_model_volume(&model_dir), Err(ServeError::NoModelVolume(_))));
        assert!(check_model_volume(&dir.path().join("model")).is_ok());
    }

    fn untrained_weights() -> Vec<u8> {
        use burn::module::Module;
        use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};

        let model = ModelConfig::new().with_image_size(32).init::<NdArray>(&NdArrayDevice::default());
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap()
    }

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(class_names(), 32, 1, 1, 1e-3, 0, 0, 0)
    }

    #[tokio::test]
    async fn test_wait_returns_once_model_appears() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("model");
        let writer_dir = model_dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            save_model_with_metadata(&writer_dir, &metadata(), &untrained_weights()).unwrap();
        });

        let predictor = tokio::time::timeout(
            Duration::from_secs(10),
            wait_for_model(&model_dir, DeviceType::Cpu, Duration::from_millis(10)),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(predictor.predict_bytes(b"not an image").is_err());
    }

    #[tokio::test]
    async fn test_wait_retries_bundle_with_bad_weights() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("model");
        // メタデータは読めるが重みが壊れているバンドル
        save_model_with_metadata(&model_dir, &metadata(), b"truncated").unwrap();
        assert!(load_predictor(&model_dir, DeviceType::Cpu).is_err());

        let writer_dir = model_dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            save_model_with_metadata(&writer_dir, &metadata(), &untrained_weights()).unwrap();
        });

        let predictor = tokio::time::timeout(
            Duration::from_secs(10),
            wait_for_model(&model_dir, DeviceType::Cpu, Duration::from_millis(20)),
        )
        .await
        .unwrap()
        .unwrap();

        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(40, 40));
        let score = predictor.predict_image(&img).unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
}
