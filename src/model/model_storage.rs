//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、入力サイズ、学習結果など）
//! - model.bin       - モデルの重み（BinBytesRecorder, f32）

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{Error, Result};
use crate::ml::ActionClassifier;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// モデルの重みをバイト列に変換
pub fn encode_model<B: Backend>(model: ActionClassifier<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| Error::Record(format!("failed to encode model weights: {:?}", e)))
}

/// 出力パスを `.tar.gz` に揃える
pub fn bundle_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 実際に書き込んだパスを返す。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = bundle_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tar_gz_file = File::create(&tar_gz_path)?;
    let mut tar_builder = Builder::new(GzEncoder::new(tar_gz_file, Compression::default()));

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder.into_inner()?.finish()?;

    tracing::info!(
        "モデルを保存しました: {} ({:.2} MB)",
        tar_gz_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );
    Ok(tar_gz_path)
}

/// 学習済みモデルをメタデータと共に保存
pub fn save_model_bundle<B: Backend>(
    output_path: &Path,
    metadata: &ModelMetadata,
    model: ActionClassifier<B>,
) -> Result<PathBuf> {
    let model_binary = encode_model(model)?;
    save_model_with_metadata(output_path, metadata, &model_binary)
}

/// バンドル内の指定エントリを読む
fn read_entry(tar_gz_path: &Path, name: &str) -> Result<Vec<u8>> {
    let tar_gz_file = File::open(tar_gz_path)?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(name) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            return Ok(buffer);
        }
    }

    Err(Error::MissingKey {
        path: tar_gz_path.display().to_string(),
        key: name.to_string(),
    })
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let bytes = read_entry(tar_gz_path, METADATA_ENTRY)?;
    let json_str = String::from_utf8(bytes)
        .map_err(|e| Error::Serialization(format!("metadata.json is not UTF-8: {}", e)))?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    read_entry(tar_gz_path, MODEL_ENTRY)
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラスラベル: {}", metadata.class_labels.join(", "));
    println!("学習データ画像サイズ: {}x{}", metadata.image_width, metadata.image_height);
    println!("モデル構造:");
    println!("  ステム: {} ch", metadata.stem_channels);
    println!("  ステージ幅: {:?}", metadata.stage_widths);
    println!("  ブロック数: {:?}", metadata.stage_depths);
    println!("学習エポック数: {} / {}", metadata.epochs_trained, metadata.num_epochs);
    println!("終了理由: {}", metadata.stop_reason);
    if let Some(loss) = metadata.final_train_loss {
        println!("最終学習損失: {:.4}", loss);
    }
    if let Some(acc) = metadata.final_valid_accuracy {
        println!("最終検証精度: {:.2}%", acc * 100.0);
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ImageSet;
    use crate::ml::training::{EpochMetrics, StopReason, TrainingReport};
    use crate::ml::InferenceEngine;
    use crate::model::config::{AugmentationSettings, ModelSettings, TrainingSettings};
    use crate::types::ImageShape;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("action_recognition_bundle_{}", std::process::id()))
            .join(name)
    }

    fn tiny_settings() -> ModelSettings {
        ModelSettings {
            stem_channels: 4,
            stage_widths: vec![4, 8],
            stage_depths: vec![1, 1],
        }
    }

    fn metadata(shape: ImageShape) -> ModelMetadata {
        let report = TrainingReport {
            history: vec![EpochMetrics {
                epoch: 1,
                train_loss: 2.0,
                train_accuracy: 0.0,
                valid_loss: 2.0,
                valid_accuracy: 0.0,
            }],
            stop_reason: StopReason::EpochCap,
        };
        ModelMetadata::from_training(
            shape,
            &tiny_settings(),
            &TrainingSettings::default(),
            &AugmentationSettings::default(),
            &report,
        )
    }

    #[test]
    fn test_bundle_path_extension() {
        assert_eq!(bundle_path(Path::new("models/m")), PathBuf::from("models/m.tar.gz"));
        assert_eq!(
            bundle_path(Path::new("models/m.tar.gz")),
            PathBuf::from("models/m.tar.gz")
        );
    }

    #[test]
    fn test_bundle_restores_predictions() {
        let device = NdArrayDevice::Cpu;
        let shape = ImageShape::new(8, 8, 3);
        let model = tiny_settings().to_model_config().init::<TestBackend>(&device);

        let images = ImageSet::new(
            shape,
            (0..2 * shape.values_per_image()).map(|v| (v % 7) as f32 / 7.0).collect(),
        )
        .unwrap();
        let before = InferenceEngine::new(
            model.clone(),
            crate::model::InferenceConfig::from_metadata(&metadata(shape)),
            device.clone(),
        )
        .predict_probabilities(&images)
        .unwrap();

        let path = save_model_bundle(&temp_path("model"), &metadata(shape), model).unwrap();
        assert!(path.ends_with("model.tar.gz"));

        let loaded = load_metadata(&path).unwrap();
        assert_eq!(loaded.image_width, 8);
        assert_eq!(loaded.stage_widths, vec![4, 8]);

        let engine = InferenceEngine::<TestBackend>::load(&path, device).unwrap();
        let after = engine.predict_probabilities(&images).unwrap();
        for (a, b) in before.iter().flatten().zip(after.iter().flatten()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_missing_entry_is_reported() {
        let path = temp_path("metadata_only.tar.gz");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let json = metadata(ImageShape::new(8, 8, 3)).to_json_string().unwrap();
        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(load_metadata(&path).is_ok());
        let err = load_model_binary(&path).unwrap_err();
        assert!(matches!(err, Error::MissingKey { ref key, .. } if key == "model.bin"));
    }
}
