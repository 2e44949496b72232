use crate::types::ManifestRow;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::Deserialize;
use std::path::Path;

/// URL一覧CSVを読み込む
///
/// `url` 列のみ使用する。pandasのインデックス列など他のカラムは無視する。
pub fn load_source_urls(path: &Path) -> Result<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open source table: {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let url_idx = headers
        .iter()
        .position(|h| h.trim() == "url")
        .ok_or_else(|| anyhow::anyhow!("Missing 'url' column in {}", path.display()))?;

    let mut urls = Vec::new();

    for result in reader.records() {
        let record = result?;

        if let Some(url) = record.get(url_idx) {
            let url = url.trim();
            // 空欄はスキップ
            if !url.is_empty() {
                urls.push(url.to_string());
            }
        }
    }

    Ok(urls)
}

#[derive(Debug, Deserialize)]
struct RawManifestRow {
    uri: Option<String>,
    y: Option<u8>,
}

/// マニフェストCSVを読み込む
///
/// `uri` か `y` が欠けている行は落とす。
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open manifest: {}", path.display()))?;

    let mut rows = Vec::new();

    for result in reader.deserialize::<RawManifestRow>() {
        let raw = result.with_context(|| format!("Malformed manifest row in {}", path.display()))?;

        match (raw.uri, raw.y) {
            (Some(uri), Some(y)) if !uri.trim().is_empty() => rows.push(ManifestRow { uri, y }),
            _ => {}
        }
    }

    Ok(rows)
}

/// マニフェストCSVを書き込む（列: uri, y）
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create manifest: {}", path.display()))?;

    // 行が0件でもヘッダーは残す
    writer.write_record(["uri", "y"])?;
    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    Ok(())
}

/// 複数のマニフェストを連結して読み込む
pub fn load_manifests(paths: &[&Path]) -> Result<Vec<ManifestRow>> {
    let mut merged = Vec::new();
    for path in paths {
        merged.extend(load_manifest(path)?);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassLabel;

    #[test]
    fn test_load_source_urls_ignores_index_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moped.csv");
        std::fs::write(
            &path,
            ",url,title\n0,http://a/1.jpg,x\n1,,y\n2,http://a/2.jpg,z\n",
        )
        .unwrap();

        let urls = load_source_urls(&path).unwrap();
        assert_eq!(urls, vec!["http://a/1.jpg", "http://a/2.jpg"]);
    }

    #[test]
    fn test_load_source_urls_requires_url_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "link\nhttp://a/1.jpg\n").unwrap();

        assert!(load_source_urls(&path).is_err());
    }

    #[test]
    fn test_manifest_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mopeds2.csv");
        let rows = vec![
            ManifestRow::new("imgs/processed/moped_a.jpg", ClassLabel::Moped),
            ManifestRow::new("imgs/processed/moped_b.jpg", ClassLabel::Moped),
        ];

        write_manifest(&path, &rows).unwrap();
        assert_eq!(load_manifest(&path).unwrap(), rows);
    }

    #[test]
    fn test_load_manifest_drops_null_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cucumbers2.csv");
        // pandasの to_csv 形式（インデックス列 + 欠損値）
        std::fs::write(
            &path,
            ",uri,y\n0,imgs/processed/cucumber_a.jpg,0\n1,,0\n2,imgs/processed/cucumber_c.jpg,0\n",
        )
        .unwrap();

        let rows = load_manifest(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.y == 0));
    }
}
