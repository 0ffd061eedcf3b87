//! 学習から予測CSV出力までの一連の処理

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};

use crate::backend::{cpu_device, CpuAutodiffBackend, CpuBackend};
use crate::dataset::{self, make_rng, preview, TestDataset, TrainDataset};
use crate::export::ResultTable;
use crate::ml::{train_model, InferenceEngine, TrainingReport};
use crate::model::{save_model_bundle, AppConfig, DeviceType, InferenceConfig, ModelMetadata};
use crate::types::action_name;

/// 実行結果のまとめ
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub test_samples: usize,
    pub report: TrainingReport,
    pub result_path: PathBuf,
    pub model_path: Option<PathBuf>,
}

/// 設定に従ってバックエンドを選び、全工程を実行する
pub fn run(config: &AppConfig) -> Result<PipelineSummary> {
    config.validate().context("Invalid configuration")?;
    tracing::info!("使用デバイス: {}", config.device_type);

    match config.device_type {
        DeviceType::Cpu => run_with_backend::<CpuAutodiffBackend>(config, cpu_device(), cpu_device()),
        DeviceType::Wgpu => run_on_gpu(config),
    }
}

#[cfg(feature = "wgpu")]
fn run_on_gpu(config: &AppConfig) -> Result<PipelineSummary> {
    use crate::backend::{gpu_device, GpuAutodiffBackend};
    run_with_backend::<GpuAutodiffBackend>(config, gpu_device(), gpu_device())
}

#[cfg(not(feature = "wgpu"))]
fn run_on_gpu(_config: &AppConfig) -> Result<PipelineSummary> {
    Err(crate::error::Error::BackendUnavailable(
        "this build has no `wgpu` feature; set device_type to \"Cpu\"".to_string(),
    )
    .into())
}

/// データセットの概要をログに出す
fn explore(train: &TrainDataset, test: &TestDataset, sample: usize) {
    tracing::info!("学習画像数: {}", train.len());
    tracing::info!("ラベル数: {}", train.len());
    tracing::info!("画像サイズ: {}", train.shape());
    tracing::info!("テスト画像数: {}", test.len());
    if sample < train.len() {
        let class = train.class_index(sample);
        tracing::info!(
            "サンプル {}: {} ({})",
            sample,
            action_name(class).unwrap_or("unknown"),
            class
        );
    }
}

/// 指定したバックエンドで全工程を実行する
pub fn run_with_backend<B: AutodiffBackend>(
    config: &AppConfig,
    device: B::Device,
    inner_device: <B::InnerBackend as Backend>::Device,
) -> Result<PipelineSummary> {
    let train_path = Path::new(&config.paths.train_dataset_path);
    let test_path = Path::new(&config.paths.test_dataset_path);

    let train = dataset::load_train_dataset(train_path)
        .with_context(|| format!("Failed to load training archive {}", train_path.display()))?;
    let test = dataset::load_test_dataset(test_path)
        .with_context(|| format!("Failed to load test archive {}", test_path.display()))?;
    if test.images().shape() != train.shape() {
        return Err(crate::error::Error::Shape(format!(
            "test images have shape {}, training images have shape {}",
            test.images().shape(),
            train.shape()
        ))
        .into());
    }

    explore(&train, &test, config.preview_sample.unwrap_or(0));
    if let Some(index) = config.preview_sample {
        let dir = Path::new(&config.paths.result_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        preview::save_sample_preview(&train, index, dir).context("Failed to write preview image")?;
    }

    let mut rng = make_rng(config.training.seed);
    let split = dataset::train_valid_split(&train, config.training.valid_ratio, &mut rng)
        .context("Failed to split training data")?;
    tracing::info!("学習データ: {} 枚", split.train.len());
    tracing::info!("検証データ: {} 枚", split.validation.len());

    let model = config.model.to_model_config().init::<B>(&device);
    let (model, report) = train_model(
        model,
        &split,
        &config.training,
        &config.augmentation,
        &device,
        |_| {},
    )
    .context("Training failed")?;

    let metadata = ModelMetadata::from_training(
        split.train.shape(),
        &config.model,
        &config.training,
        &config.augmentation,
        &report,
    );
    let model = model.valid();

    let model_path = match &config.paths.model_output_path {
        Some(path) => Some(
            save_model_bundle(Path::new(path), &metadata, model.clone())
                .context("Failed to save model bundle")?,
        ),
        None => None,
    };

    let engine = InferenceEngine::<B::InnerBackend>::new(
        model,
        InferenceConfig::from_metadata(&metadata),
        inner_device,
    )
    .with_batch_size(config.training.batch_size);

    let result_path = PathBuf::from(&config.paths.result_path);
    write_predictions(&engine, &test, &result_path)?;

    Ok(PipelineSummary {
        train_samples: split.train.len(),
        validation_samples: split.validation.len(),
        test_samples: test.len(),
        report,
        result_path,
        model_path,
    })
}

fn write_predictions<B: Backend>(
    engine: &InferenceEngine<B>,
    test: &TestDataset,
    result_path: &Path,
) -> Result<ResultTable> {
    let classes = engine
        .predict_classes(test.images())
        .context("Prediction failed")?;
    let table = ResultTable::from_predictions(test.names(), &classes)
        .context("Failed to build result table")?;
    table
        .write_csv(result_path)
        .with_context(|| format!("Failed to write {}", result_path.display()))?;
    Ok(table)
}

/// 保存済みモデルでテストアーカイブを予測し、CSVに書き出す（CPU）
pub fn predict_from_bundle(bundle: &Path, test_path: &Path, result_path: &Path) -> Result<ResultTable> {
    let engine = InferenceEngine::<CpuBackend>::load(bundle, cpu_device())
        .with_context(|| format!("Failed to load model bundle {}", bundle.display()))?;
    let test = dataset::load_test_dataset(test_path)
        .with_context(|| format!("Failed to load test archive {}", test_path.display()))?;
    tracing::info!("テスト画像数: {}", test.len());

    write_predictions(&engine, &test, result_path)
}
