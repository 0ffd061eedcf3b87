//! モデルメタデータの定義
//!
//! モデルバンドル (tar.gz) 内の `metadata.json` として保存されます。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ml::training::TrainingReport;
use crate::model::config::{AugmentationSettings, ModelSettings, TrainingSettings};
use crate::types::{ImageShape, CLASS_NAMES};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（出力インデックス順）
    pub class_labels: Vec<String>,

    /// 学習画像の高さ（ピクセル）
    pub image_height: usize,

    /// 学習画像の幅（ピクセル）
    pub image_width: usize,

    /// ステム畳み込みのチャネル数
    pub stem_channels: usize,

    /// ステージごとのチャネル数
    pub stage_widths: Vec<usize>,

    /// ステージごとの残差ブロック数
    pub stage_depths: Vec<usize>,

    /// 入力画素に掛けた係数
    #[serde(default = "default_rescale")]
    pub rescale: f32,

    /// 最大エポック数
    pub num_epochs: usize,

    /// 実際に学習したエポック数
    pub epochs_trained: usize,

    /// 終了理由
    pub stop_reason: String,

    /// 最終エポックの学習損失
    pub final_train_loss: Option<f64>,

    /// 最終エポックの検証精度
    pub final_valid_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_rescale() -> f32 {
    1.0
}

impl ModelMetadata {
    /// 学習結果からメタデータを作成
    pub fn from_training(
        shape: ImageShape,
        model: &ModelSettings,
        training: &TrainingSettings,
        augmentation: &AugmentationSettings,
        report: &TrainingReport,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            image_height: shape.height,
            image_width: shape.width,
            stem_channels: model.stem_channels,
            stage_widths: model.stage_widths.clone(),
            stage_depths: model.stage_depths.clone(),
            rescale: augmentation.rescale,
            num_epochs: training.num_epochs,
            epochs_trained: report.epochs_run(),
            stop_reason: report.stop_reason.to_string(),
            final_train_loss: report.final_train_loss(),
            final_valid_accuracy: report.history.last().map(|m| m.valid_accuracy),
            trained_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
