mod common;

use kurkkuvaimopo::csv_loader::load_manifest;
use kurkkuvaimopo::model::{inspect_model, AppConfig, DeviceType, ModelState};
use kurkkuvaimopo::pipeline::{run_pipeline, PipelineOutcome};
use kurkkuvaimopo::types::ClassLabel;

/// 小さな入力サイズ・1エポックのCPU設定
fn small_config(root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.device_type = DeviceType::Cpu;
    config.paths.data_dir = root.join("data");
    config.paths.imgs_dir = root.join("imgs");
    config.paths.model_dir = root.join("model").join("model");
    config.acquisition.sample_size = 30;
    config.acquisition.fetch_timeout_secs = 2;
    config.acquisition.workers = Some(4);
    config.training.num_epochs = 1;
    config.training.batch_size = 8;
    config.training.image_size = 32;
    config.training.seed = Some(7);
    config
}

#[test]
fn test_full_acquisition_then_short_circuit() {
    let addr = common::spawn_image_host();
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let layout = config.layout();

    let mut cucumber_urls = common::image_urls(addr, 0..30);
    cucumber_urls.extend(common::broken_urls(addr));
    common::write_source_table(&layout.source_path(ClassLabel::Cucumber), &cucumber_urls);
    common::write_source_table(&layout.source_path(ClassLabel::Moped), &common::image_urls(addr, 100..140));

    let outcome = run_pipeline(&config).unwrap();
    let (manifests, report) = match outcome {
        PipelineOutcome::TrainedFromScratch { manifests, report } => (manifests, report),
        other => panic!("expected full acquisition, got {other:?}"),
    };

    assert_eq!(manifests.len(), 2);
    assert!(manifests.iter().all(|m| m.requested == 30));
    assert_eq!(manifests[1].rows.len(), 30);
    assert_eq!(report.seed, 7);
    assert!(report.test.is_some());
    assert_eq!(report.train_samples + report.test_samples, manifests.iter().map(|m| m.rows.len()).sum::<usize>());

    for label in ClassLabel::ALL {
        let rows = load_manifest(&layout.manifest_path(label)).unwrap();
        assert!(rows.iter().all(|row| row.y == label.y() && row.path().is_file()));
    }

    let ModelState::Present(metadata) = inspect_model(&config.paths.model_dir) else {
        panic!("model was not saved");
    };
    assert_eq!(metadata.model_input_size, 32);
    assert_eq!(metadata.seed, 7);
    assert_eq!(metadata.num_epochs, 1);
    assert!(metadata.test_accuracy.is_some());

    // 2回目はモデルがあるので何もしない（ソースCSVを消しても成功する）
    std::fs::remove_dir_all(&config.paths.data_dir).unwrap();
    let processed_before = std::fs::read_dir(layout.processed_dir()).unwrap().count();
    assert!(matches!(run_pipeline(&config).unwrap(), PipelineOutcome::AlreadyTrained));
    assert_eq!(std::fs::read_dir(layout.processed_dir()).unwrap().count(), processed_before);
}

#[test]
fn test_train_from_existing_manifests() {
    let addr = common::spawn_image_host();
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let layout = config.layout();

    // 画像を集めてからモデルだけ消す
    common::write_source_table(&layout.source_path(ClassLabel::Cucumber), &common::image_urls(addr, 0..30));
    common::write_source_table(&layout.source_path(ClassLabel::Moped), &common::image_urls(addr, 50..80));
    run_pipeline(&config).unwrap();
    std::fs::remove_dir_all(&config.paths.model_dir).unwrap();

    // ソースCSVが無くても、処理済み画像 > 50 ならそのまま学習する
    std::fs::remove_dir_all(&config.paths.data_dir).unwrap();
    let outcome = run_pipeline(&config).unwrap();
    let report = match outcome {
        PipelineOutcome::TrainedFromManifests(report) => report,
        other => panic!("expected training from manifests, got {other:?}"),
    };
    assert_eq!(report.train_samples, 51);
    assert_eq!(report.test_samples, 9);
    assert!(inspect_model(&config.paths.model_dir).is_present());
}

#[test]
fn test_accuracy_gate_blocks_save() {
    let addr = common::spawn_image_host();
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.acquisition.sample_size = 12;
    config.training.min_test_accuracy = Some(1.01);
    let layout = config.layout();

    common::write_source_table(&layout.source_path(ClassLabel::Cucumber), &common::image_urls(addr, 0..12));
    common::write_source_table(&layout.source_path(ClassLabel::Moped), &common::image_urls(addr, 12..24));

    assert!(run_pipeline(&config).is_err());
    assert!(matches!(inspect_model(&config.paths.model_dir), ModelState::Missing));
}
