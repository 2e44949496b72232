use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// 推論サーバーのエラー
///
/// ハンドラーのエラーは全て 500 とメッセージ本文で返す。
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("no model volume: {0}")]
    NoModelVolume(String),

    #[error("invalid multipart request: {0}")]
    Rejection(#[from] MultipartRejection),

    #[error("failed to read multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("missing form field '{0}'")]
    MissingField(&'static str),

    #[error("{0:#}")]
    Predict(anyhow::Error),

    #[error("model lock poisoned")]
    Poisoned,

    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        tracing::error!("{}", self);
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
