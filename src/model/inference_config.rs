//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use std::path::Path;

use crate::error::Result;
use crate::ml::ModelConfig;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage;
use crate::types::{ImageShape, IMAGE_CHANNELS};

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// クラスラベル（出力インデックス順）
    pub class_labels: Vec<String>,

    /// 入力画像サイズ
    pub image_height: usize,
    pub image_width: usize,

    /// モデル構造
    pub stem_channels: usize,
    pub stage_widths: Vec<usize>,
    pub stage_depths: Vec<usize>,

    /// 入力画素に掛ける係数
    pub rescale: f32,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            image_height: metadata.image_height,
            image_width: metadata.image_width,
            stem_channels: metadata.stem_channels,
            stage_widths: metadata.stage_widths.clone(),
            stage_depths: metadata.stage_depths.clone(),
            rescale: metadata.rescale,
        }
    }

    /// モデルファイルから推論設定を読み込む
    pub fn load_from_model(bundle_path: &Path) -> Result<Self> {
        let metadata = model_storage::load_metadata(bundle_path)?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn image_shape(&self) -> ImageShape {
        ImageShape::new(self.image_height, self.image_width, IMAGE_CHANNELS)
    }

    /// 保存時と同じ構造のモデル設定
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.num_classes())
            .with_stem_channels(self.stem_channels)
            .with_stage_widths(self.stage_widths.clone())
            .with_stage_depths(self.stage_depths.clone())
    }

    /// クラスインデックスから行動名を取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("クラス数: {}", self.num_classes());
        println!("クラスラベル: {}", self.class_labels.join(", "));
        println!("入力画像サイズ: {}x{}", self.image_width, self.image_height);
        println!(
            "モデル構造: stem={} widths={:?} depths={:?}",
            self.stem_channels, self.stage_widths, self.stage_depths
        );
        println!("==================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CLASS_NAMES;

    fn config() -> InferenceConfig {
        InferenceConfig {
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            image_height: 32,
            image_width: 24,
            stem_channels: 64,
            stage_widths: vec![64, 128],
            stage_depths: vec![2, 2],
            rescale: 1.0,
        }
    }

    #[test]
    fn test_class_index_to_label() {
        let config = config();
        assert_eq!(config.class_index_to_label(0), Some("sitting"));
        assert_eq!(config.class_index_to_label(14), Some("dancing"));
        assert_eq!(config.class_index_to_label(15), None);
    }

    #[test]
    fn test_shape_and_model_config() {
        let config = config();
        assert_eq!(config.image_shape(), ImageShape::new(32, 24, 3));
        let model_config = config.model_config();
        assert_eq!(model_config.num_classes, 15);
        assert_eq!(model_config.block_strides(), vec![1, 1, 2, 1]);
    }
}
