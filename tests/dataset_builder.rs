mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

use kurkkuvaimopo::csv_loader::load_manifest;
use kurkkuvaimopo::dataset::{DatasetBuilder, FetchError, ImageFetcher};
use kurkkuvaimopo::model::AcquisitionSettings;
use kurkkuvaimopo::types::{ClassLabel, DataLayout};

fn settings() -> AcquisitionSettings {
    AcquisitionSettings {
        fetch_timeout_secs: 2,
        workers: Some(4),
        ..AcquisitionSettings::default()
    }
}

#[test]
fn test_five_urls_per_class() {
    let addr = common::spawn_image_host();
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path().join("data"), dir.path().join("imgs"));

    let builder = DatasetBuilder::new(layout.clone(), settings(), 128).unwrap();
    let sources = vec![
        (ClassLabel::Cucumber, common::image_urls(addr, 0..5)),
        (ClassLabel::Moped, common::image_urls(addr, 5..10)),
    ];
    let manifests = builder.build(&sources, &mut StdRng::seed_from_u64(0)).unwrap();

    assert_eq!(manifests.len(), 2);
    for manifest in &manifests {
        assert_eq!(manifest.rows.len(), 5);
        assert_eq!(manifest.failed(), 0);
    }

    let cucumbers = load_manifest(&layout.manifest_path(ClassLabel::Cucumber)).unwrap();
    let mopeds = load_manifest(&layout.manifest_path(ClassLabel::Moped)).unwrap();
    assert_eq!(cucumbers.len(), 5);
    assert_eq!(mopeds.len(), 5);
    assert!(cucumbers.iter().all(|row| row.y == 0));
    assert!(mopeds.iter().all(|row| row.y == 1));

    for row in cucumbers.iter().chain(&mopeds) {
        assert!(row.path().is_file(), "missing {}", row.uri);
        let img = image::open(row.path()).unwrap();
        assert_eq!((img.width(), img.height()), (128, 128));
    }

    let processed = std::fs::read_dir(layout.processed_dir()).unwrap().count();
    assert_eq!(processed, 10);
    let prefixed = std::fs::read_dir(layout.processed_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("moped_"))
        .count();
    assert_eq!(prefixed, 5);
}

#[test]
fn test_failed_urls_are_omitted() {
    let addr = common::spawn_image_host();
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path().join("data"), dir.path().join("imgs"));

    let mut urls = common::image_urls(addr, 0..3);
    urls.extend(common::broken_urls(addr));

    let builder = DatasetBuilder::new(layout.clone(), settings(), 128).unwrap();
    let manifests = builder
        .build(&[(ClassLabel::Cucumber, urls)], &mut StdRng::seed_from_u64(1))
        .unwrap();

    assert_eq!(manifests[0].requested, 7);
    assert_eq!(manifests[0].rows.len(), 3);

    let rows = load_manifest(&layout.manifest_path(ClassLabel::Cucumber)).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.path().is_file()));
    assert_eq!(std::fs::read_dir(layout.processed_dir()).unwrap().count(), 3);
}

#[test]
fn test_fetch_error_kinds() {
    let addr = common::spawn_image_host();
    let fetcher = ImageFetcher::new(Duration::from_secs(2)).unwrap();

    // 本文が空なのでデコードで失敗する
    let err = fetcher.fetch(&format!("http://{addr}/missing")).unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));

    let err = fetcher.fetch(&format!("http://{addr}/moved")).unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));

    let err = fetcher.fetch(&format!("http://{addr}/garbage")).unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));

    let img = fetcher.fetch(&format!("http://{addr}/img/3")).unwrap();
    assert_eq!((img.width(), img.height()), (160, 120));
}

#[test]
fn test_image_body_with_error_status_is_kept() {
    let addr = common::spawn_image_host();
    let fetcher = ImageFetcher::new(Duration::from_secs(2)).unwrap();

    let img = fetcher.fetch(&common::placeholder_url(addr)).unwrap();
    assert_eq!((img.width(), img.height()), (90, 60));

    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path().join("data"), dir.path().join("imgs"));
    let builder = DatasetBuilder::new(layout.clone(), settings(), 128).unwrap();
    let mut urls = common::image_urls(addr, 0..2);
    urls.push(common::placeholder_url(addr));

    let manifests = builder
        .build(&[(ClassLabel::Moped, urls)], &mut StdRng::seed_from_u64(2))
        .unwrap();
    assert_eq!(manifests[0].rows.len(), 3);
    assert_eq!(manifests[0].failed(), 0);
}

#[test]
fn test_write_into_missing_dir() {
    let addr = common::spawn_image_host();
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ImageFetcher::new(Duration::from_secs(2)).unwrap();

    let dest = dir.path().join("no_such_dir").join("a.jpg");
    let err = fetcher.fetch_to(&format!("http://{addr}/img/1"), Some(&dest)).unwrap_err();
    assert!(err.is_not_found());
}
