use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Router,
};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use crate::ml::Predictor;
use crate::server::errors::ServeError;

/// 画像を受け取るフォームフィールド名
pub const IMAGE_FIELD: &str = "img";

/// アップロードサイズの上限
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// 推論は1リクエストずつ（モデルはミューテックスの中）
pub type SharedPredictor = Arc<Mutex<Box<dyn Predictor>>>;

#[derive(Clone)]
pub struct AppState {
    predictor: SharedPredictor,
}

pub fn router(predictor: Box<dyn Predictor>) -> Router {
    let state = AppState {
        predictor: Arc::new(Mutex::new(predictor)),
    };

    Router::new()
        .route("/ping", get(ping_handler))
        .route("/kurkkuvaimopo", post(classify_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ping_handler() -> &'static str {
    "pong"
}

/// multipart の `img` を分類してスコアを文字列で返す
async fn classify_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, ServeError> {
    let mut multipart = multipart?;

    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            image = Some(field.bytes().await?);
            break;
        }
    }
    let image = image.ok_or(ServeError::MissingField(IMAGE_FIELD))?;
    tracing::debug!("画像を受信しました ({} bytes)", image.len());

    let predictor = state.predictor.clone();
    let score = tokio::task::spawn_blocking(move || {
        let predictor = predictor.lock().map_err(|_| ServeError::Poisoned)?;
        predictor.predict_bytes(&image).map_err(ServeError::Predict)
    })
    .await??;

    Ok(score.to_string())
}
