//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・データパス・モデル構造・学習条件・データ拡張をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ml::ModelConfig;
use crate::types::NUM_CLASSES;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 入出力パス
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// 学習用アーカイブ
    pub train_dataset_path: String,
    /// テスト用アーカイブ
    pub test_dataset_path: String,
    /// 予測結果CSV
    pub result_path: String,
    /// 学習済みモデルの保存先（Noneなら保存しない）
    pub model_output_path: Option<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            train_dataset_path: "data/train.tar".to_string(),
            test_dataset_path: "data/test.tar".to_string(),
            result_path: "result.csv".to_string(),
            model_output_path: Some("models/action_classifier.tar.gz".to_string()),
        }
    }
}

/// モデル構造の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// ステム畳み込みのチャネル数
    pub stem_channels: usize,
    /// ステージごとのチャネル数
    pub stage_widths: Vec<usize>,
    /// ステージごとの残差ブロック数
    pub stage_depths: Vec<usize>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            stem_channels: 64,
            stage_widths: vec![64, 128, 256, 512],
            stage_depths: vec![3, 4, 6, 3],
        }
    }
}

impl ModelSettings {
    /// burn側のモデル設定に変換
    pub fn to_model_config(&self) -> ModelConfig {
        ModelConfig::new(NUM_CLASSES)
            .with_stem_channels(self.stem_channels)
            .with_stage_widths(self.stage_widths.clone())
            .with_stage_depths(self.stage_depths.clone())
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// 検証データの割合
    pub valid_ratio: f64,
    /// バッチサイズ
    pub batch_size: usize,
    /// 最大エポック数
    pub num_epochs: usize,
    /// 学習率
    pub learning_rate: f64,
    /// 学習損失が改善しないまま許容するエポック数
    pub early_stopping_patience: usize,
    /// ランダムシード（Noneなら毎回異なる）
    pub seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            valid_ratio: 0.2,
            batch_size: 64,
            num_epochs: 100,
            learning_rate: 1e-3,
            early_stopping_patience: 10,
            seed: None,
        }
    }
}

/// データ拡張設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationSettings {
    /// 幅に対する最大水平シフト量
    pub width_shift: f32,
    /// 高さに対する最大垂直シフト量
    pub height_shift: f32,
    /// ランダムな左右反転
    pub horizontal_flip: bool,
    /// 検証データにも拡張を適用するか
    pub augment_validation: bool,
    /// 画素値に掛ける係数
    pub rescale: f32,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            width_shift: 3.0 / 32.0,
            height_shift: 3.0 / 32.0,
            horizontal_flip: true,
            augment_validation: false,
            rescale: 1.0,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub augmentation: AugmentationSettings,
    /// プレビュー画像として書き出す学習サンプルの番号
    #[serde(default)]
    pub preview_sample: Option<usize>,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    tracing::warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の整合性を検証する
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if !(t.valid_ratio > 0.0 && t.valid_ratio < 1.0) {
            return Err(Error::Config(format!(
                "valid_ratio must be in (0, 1), got {}",
                t.valid_ratio
            )));
        }
        if t.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if t.num_epochs == 0 {
            return Err(Error::Config("num_epochs must be positive".to_string()));
        }
        if !(t.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }

        let a = &self.augmentation;
        if a.width_shift < 0.0 || a.height_shift < 0.0 {
            return Err(Error::Config("shift ranges must not be negative".to_string()));
        }

        let m = &self.model;
        if m.stem_channels == 0 || m.stage_widths.is_empty() {
            return Err(Error::Config("model needs a stem and at least one stage".to_string()));
        }
        if m.stage_widths.len() != m.stage_depths.len() {
            return Err(Error::Config(format!(
                "{} stage widths but {} stage depths",
                m.stage_widths.len(),
                m.stage_depths.len()
            )));
        }
        if m.stage_widths.contains(&0) || m.stage_depths.iter().sum::<usize>() == 0 {
            return Err(Error::Config("stages must have non-zero width and at least one block".to_string()));
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        tracing::info!("=== アプリケーション設定 ===");
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("学習データ: {}", self.paths.train_dataset_path);
        tracing::info!("テストデータ: {}", self.paths.test_dataset_path);
        tracing::info!("出力CSV: {}", self.paths.result_path);
        tracing::info!(
            "モデル: stem={} widths={:?} depths={:?}",
            self.model.stem_channels,
            self.model.stage_widths,
            self.model.stage_depths
        );
        tracing::info!(
            "学習: エポック数={} バッチサイズ={} 学習率={} patience={} 検証割合={}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.early_stopping_patience,
            self.training.valid_ratio
        );
        tracing::info!(
            "拡張: shift=({:.4}, {:.4}) flip={} 検証にも適用={}",
            self.augmentation.width_shift,
            self.augmentation.height_shift,
            self.augmentation.horizontal_flip,
            self.augmentation.augment_validation
        );
    }
}
