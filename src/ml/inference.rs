//! モデル推論機能

use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::dataset::batcher::images_to_tensor;
use crate::dataset::ImageSet;
use crate::error::{Error, Result};
use crate::ml::ActionClassifier;
use crate::model::{load_metadata, load_model_binary, InferenceConfig};

/// 推論時のバッチサイズ
pub const DEFAULT_INFERENCE_BATCH_SIZE: usize = 64;

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: ActionClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
    batch_size: usize,
}

impl<B: Backend> InferenceEngine<B> {
    /// 学習済みモデルから推論エンジンを作成
    pub fn new(model: ActionClassifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
            batch_size: DEFAULT_INFERENCE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// モデルバンドル (.tar.gz) を読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(bundle_path: P, device: B::Device) -> Result<Self> {
        let metadata = load_metadata(bundle_path.as_ref())?;
        let config = InferenceConfig::from_metadata(&metadata);

        let model = config.model_config().init::<B>(&device);
        let model_binary = load_model_binary(bundle_path.as_ref())?;

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| Error::Record(format!("failed to decode model weights: {:?}", e)))?;
        let model = model.load_record(record);

        tracing::info!("モデルを読み込みました: {}", bundle_path.as_ref().display());

        Ok(Self::new(model, config, device))
    }

    /// 画像ごとのクラス確率を計算（各行の和は1）
    pub fn predict_probabilities(&self, images: &ImageSet) -> Result<Vec<Vec<f32>>> {
        let expected = self.config.image_shape();
        if images.shape() != expected {
            return Err(Error::Shape(format!(
                "model expects images of shape {}, found {}",
                expected,
                images.shape()
            )));
        }

        let num_classes = self.config.num_classes();
        let mut probabilities = Vec::with_capacity(images.len());
        let mut start = 0;
        while start < images.len() {
            let end = (start + self.batch_size).min(images.len());
            let mut pixels = images.images(start..end).to_vec();
            if self.config.rescale != 1.0 {
                for value in &mut pixels {
                    *value *= self.config.rescale;
                }
            }

            let input = images_to_tensor::<B>(&pixels, end - start, expected, &self.device);
            let output = self
                .model
                .forward_probabilities(input)
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| Error::Shape(format!("failed to read predictions: {:?}", e)))?;

            probabilities.extend(output.chunks(num_classes).map(<[f32]>::to_vec));
            start = end;
        }

        Ok(probabilities)
    }

    /// 画像ごとの予測クラスインデックス
    pub fn predict_classes(&self, images: &ImageSet) -> Result<Vec<usize>> {
        let probabilities = self.predict_probabilities(images)?;
        Ok(probabilities.iter().map(|p| argmax(p)).collect())
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

/// 最大値の最初のインデックス
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
