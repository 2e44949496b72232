#![allow(dead_code)]

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect},
    routing::get,
    Router,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::net::SocketAddr;

/// 別スレッドのランタイムでルーターを 127.0.0.1:0 に立てる
pub fn spawn_server(app: Router) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    addr
}

pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([seed.wrapping_add(x as u8), (y as u8).wrapping_mul(3), seed ^ 0x5a])
    });
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

async fn image_handler(Path(id): Path<u8>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], png_bytes(160, 120, id))
}

/// 404 のステータスで画像本文を返すホスト（プレースホルダー画像など）
async fn not_found_image_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "image/png")],
        png_bytes(90, 60, 77),
    )
}

/// 画像ホストの代わり
///
/// - `/img/:id` 生成したPNG
/// - `/missing` 404（本文なし）
/// - `/placeholder` 404 だが本文はPNG
/// - `/moved` 307（追わない）
/// - `/garbage` 画像でない本文
pub fn spawn_image_host() -> SocketAddr {
    let app = Router::new()
        .route("/img/:id", get(image_handler))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/placeholder", get(not_found_image_handler))
        .route("/moved", get(|| async { Redirect::temporary("/img/1") }))
        .route("/garbage", get(|| async { "this is not an image" }));
    spawn_server(app)
}

pub fn image_urls(addr: SocketAddr, range: std::ops::Range<u8>) -> Vec<String> {
    range.map(|i| format!("http://{addr}/img/{i}")).collect()
}

pub fn placeholder_url(addr: SocketAddr) -> String {
    format!("http://{addr}/placeholder")
}

pub fn broken_urls(addr: SocketAddr) -> Vec<String> {
    vec![
        format!("http://{addr}/missing"),
        format!("http://{addr}/moved"),
        format!("http://{addr}/garbage"),
        "http://127.0.0.1:1/refused.png".to_string(),
    ]
}

/// `url` 列を持つソースCSV（先頭にpandasのインデックス列）
pub fn write_source_table(path: &std::path::Path, urls: &[String]) {
    let mut body = String::from(",url\n");
    for (i, url) in urls.iter().enumerate() {
        body.push_str(&format!("{i},{url}\n"));
    }
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}
