//! モデル学習
//!
//! 拡張付きバッチでAdam更新を行い、エポックごとに検証する。
//! 学習損失が `early_stopping_patience` エポック連続で改善しなければ打ち切る。

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::dataset::{make_rng, Augmenter, BatchGenerator, ImageBatcher, Split, TrainDataset};
use crate::error::{Error, Result};
use crate::ml::ml_model::categorical_cross_entropy;
use crate::ml::ActionClassifier;
use crate::model::config::{AugmentationSettings, TrainingSettings};

/// 1エポック分の指標
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1始まりのエポック番号
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// 学習が終了した理由
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// 最大エポック数に到達
    EpochCap,
    /// 学習損失が改善しなくなった
    EarlyStopped { best_loss: f64, best_epoch: usize },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EpochCap => write!(f, "reached epoch cap"),
            StopReason::EarlyStopped { best_loss, best_epoch } => write!(
                f,
                "early stopped (best loss {:.4} at epoch {})",
                best_loss, best_epoch
            ),
        }
    }
}

/// 学習損失を監視する早期終了判定
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    best_epoch: usize,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            wait: 0,
        }
    }

    /// エポックの損失を記録し、打ち切るべきならtrueを返す
    ///
    /// 改善は「これまでの最良より厳密に小さい」こと。NaNは改善とみなさない。
    pub fn update(&mut self, epoch: usize, loss: f64) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = epoch;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

/// 学習結果のまとめ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub history: Vec<EpochMetrics>,
    pub stop_reason: StopReason,
}

impl TrainingReport {
    /// 実行したエポック数
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }

    pub fn final_train_loss(&self) -> Option<f64> {
        self.history.last().map(|m| m.train_loss)
    }
}

/// エポックのループを回す
///
/// `run_epoch` は状態と1始まりのエポック番号を受け取り、更新後の状態と指標を返す。
pub fn run_epochs<S, F, P>(
    initial: S,
    num_epochs: usize,
    patience: usize,
    mut run_epoch: F,
    mut progress: P,
) -> Result<(S, TrainingReport)>
where
    F: FnMut(S, usize) -> Result<(S, EpochMetrics)>,
    P: FnMut(&EpochMetrics),
{
    let mut state = initial;
    let mut history = Vec::with_capacity(num_epochs);
    let mut early_stopping = EarlyStopping::new(patience);
    let mut stop_reason = StopReason::EpochCap;

    for epoch in 1..=num_epochs {
        let (next, metrics) = run_epoch(state, epoch)?;
        state = next;
        progress(&metrics);
        history.push(metrics);

        if early_stopping.update(epoch, metrics.train_loss) {
            stop_reason = StopReason::EarlyStopped {
                best_loss: early_stopping.best_loss(),
                best_epoch: early_stopping.best_epoch(),
            };
            tracing::info!("早期終了: {}", stop_reason);
            break;
        }
    }

    Ok((state, TrainingReport { history, stop_reason }))
}

/// 予測クラスとone-hotターゲットが一致した数
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> usize {
    let correct: i64 = logits
        .argmax(1)
        .equal(targets.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// 検証用のバッチ列（シャッフルなし）
///
/// `augment_validation` が偽ならスケーリングのみ行う。
fn validation_batches<'a>(
    validation: &'a TrainDataset,
    batch_size: usize,
    augmentation: &AugmentationSettings,
    rng: StdRng,
) -> BatchGenerator<'a, TrainDataset> {
    let augmenter = if augmentation.augment_validation {
        Augmenter::new(augmentation)
    } else {
        Augmenter::rescale_only(augmentation.rescale)
    };
    BatchGenerator::new(validation, validation.shape(), batch_size, augmenter, rng)
        .with_shuffle(false)
}

/// モデルを学習する
///
/// 学習済みモデルと学習結果を返す。検証は非autodiffのモデルで行う。
pub fn train_model<B: AutodiffBackend>(
    model: ActionClassifier<B>,
    split: &Split,
    training: &TrainingSettings,
    augmentation: &AugmentationSettings,
    device: &B::Device,
    progress: impl FnMut(&EpochMetrics),
) -> Result<(ActionClassifier<B>, TrainingReport)> {
    if split.train.is_empty() || split.validation.is_empty() {
        return Err(Error::Config("training and validation sets must be non-empty".to_string()));
    }

    let shape = split.train.shape();
    let mut rng = make_rng(training.seed);

    let mut train_batches = BatchGenerator::new(
        &split.train,
        shape,
        training.batch_size,
        Augmenter::new(augmentation),
        StdRng::seed_from_u64(rng.gen()),
    );
    let mut valid_batches = validation_batches(
        &split.validation,
        training.batch_size,
        augmentation,
        StdRng::seed_from_u64(rng.gen()),
    );

    let batcher = ImageBatcher::<B>::new(device.clone(), shape);
    let optimizer = AdamConfig::new().init::<B, ActionClassifier<B>>();
    let learning_rate = training.learning_rate;

    tracing::info!(
        "学習を開始します: 学習 {} 枚 / 検証 {} 枚, {} ステップ/エポック",
        split.train.len(),
        split.validation.len(),
        train_batches.steps_per_epoch()
    );
    tracing::info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        training.num_epochs,
        training.batch_size,
        learning_rate
    );

    let ((model, _), report) = run_epochs(
        (model, optimizer),
        training.num_epochs,
        training.early_stopping_patience,
        |(mut model, mut optimizer), epoch| {
            let mut loss_sum = 0.0;
            let mut correct = 0usize;
            let mut seen = 0usize;

            for items in train_batches.epoch() {
                let batch = batcher.batch(items, device);
                let batch_size = batch.targets.dims()[0];

                let (loss, logits) = model.forward_loss(batch.images, batch.targets.clone());
                loss_sum += loss.clone().into_scalar().elem::<f64>() * batch_size as f64;
                correct += count_correct(logits, batch.targets);
                seen += batch_size;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(learning_rate, model, grads);
            }

            // 検証
            let valid_model = model.valid();
            let mut valid_loss_sum = 0.0;
            let mut valid_correct = 0usize;
            let mut valid_seen = 0usize;
            for items in valid_batches.epoch() {
                let batch = batcher.batch(items, device);
                let images = batch.images.inner();
                let targets = batch.targets.inner();
                let batch_size = targets.dims()[0];

                let logits = valid_model.forward(images);
                let loss = categorical_cross_entropy(logits.clone(), targets.clone());
                valid_loss_sum += loss.into_scalar().elem::<f64>() * batch_size as f64;
                valid_correct += count_correct(logits, targets);
                valid_seen += batch_size;
            }

            let metrics = EpochMetrics {
                epoch,
                train_loss: loss_sum / seen.max(1) as f64,
                train_accuracy: correct as f64 / seen.max(1) as f64,
                valid_loss: valid_loss_sum / valid_seen.max(1) as f64,
                valid_accuracy: valid_correct as f64 / valid_seen.max(1) as f64,
            };
            tracing::info!(
                "Epoch {}/{}: loss = {:.4}, acc = {:.2}% | val_loss = {:.4}, val_acc = {:.2}%",
                epoch,
                training.num_epochs,
                metrics.train_loss,
                metrics.train_accuracy * 100.0,
                metrics.valid_loss,
                metrics.valid_accuracy * 100.0
            );

            Ok(((model, optimizer), metrics))
        },
        progress,
    )?;

    tracing::info!(
        "学習が完了しました: {} エポック ({})",
        report.epochs_run(),
        report.stop_reason
    );

    Ok((model, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{fixtures, train_valid_split, ImageSet};
    use crate::ml::ModelConfig;
    use crate::types::{ImageShape, NUM_CLASSES};
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = Autodiff<NdArray<f32>>;

    /// 画素が位置ごとに異なる検証用データ（全てクラス0）
    fn gradient_dataset(count: usize, size: usize) -> TrainDataset {
        let shape = ImageShape::new(size, size, 3);
        let pixels = (0..count * shape.values_per_image())
            .map(|v| (v % 97) as f32)
            .collect();
        let mut targets = vec![0.0; count * NUM_CLASSES];
        for row in 0..count {
            targets[row * NUM_CLASSES] = 1.0;
        }
        TrainDataset::new(ImageSet::new(shape, pixels).unwrap(), targets).unwrap()
    }

    fn validation_pixels(dataset: &TrainDataset, settings: &AugmentationSettings) -> Vec<Vec<f32>> {
        let mut batches = validation_batches(dataset, 3, settings, StdRng::seed_from_u64(9));
        batches
            .epoch()
            .flatten()
            .map(|item| item.pixels)
            .collect()
    }

    fn metrics(epoch: usize, loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: loss,
            train_accuracy: 0.0,
            valid_loss: loss,
            valid_accuracy: 0.0,
        }
    }

    /// 損失列を順に返すだけのエポック関数で `run_epochs` を回す
    fn run_losses(losses: &[f64], num_epochs: usize, patience: usize) -> TrainingReport {
        let (_, report) = run_epochs(
            (),
            num_epochs,
            patience,
            |state, epoch| Ok((state, metrics(epoch, losses[epoch - 1]))),
            |_| {},
        )
        .unwrap();
        report
    }

    #[test]
    fn test_validation_batches_are_not_augmented_by_default() {
        let dataset = gradient_dataset(8, 8);
        let settings = AugmentationSettings::default();
        assert!(!settings.augment_validation);

        let pixels = validation_pixels(&dataset, &settings);
        assert_eq!(pixels.len(), 8);
        for (i, image) in pixels.iter().enumerate() {
            assert_eq!(image.as_slice(), dataset.images().image(i));
        }
    }

    #[test]
    fn test_validation_batches_keep_rescale() {
        let dataset = gradient_dataset(2, 4);
        let settings = AugmentationSettings {
            rescale: 0.5,
            ..AugmentationSettings::default()
        };

        let pixels = validation_pixels(&dataset, &settings);
        let expected: Vec<f32> = dataset.images().image(1).iter().map(|v| v * 0.5).collect();
        assert_eq!(pixels[1], expected);
    }

    #[test]
    fn test_validation_batches_augmented_when_enabled() {
        let dataset = gradient_dataset(8, 8);
        let settings = AugmentationSettings {
            width_shift: 0.5,
            height_shift: 0.5,
            augment_validation: true,
            ..AugmentationSettings::default()
        };

        let pixels = validation_pixels(&dataset, &settings);
        assert_eq!(pixels.len(), 8);
        // シャッフルはしないので順序は保たれ、画素だけが変わる
        let changed = pixels
            .iter()
            .enumerate()
            .filter(|(i, image)| image.as_slice() != dataset.images().image(*i))
            .count();
        assert!(changed > 0);
    }

    #[test]
    fn test_plateau_triggers_early_stop() {
        // 3エポック目が最良、その後10エポック改善なし
        let mut losses = vec![3.0, 2.0, 1.0];
        losses.extend(std::iter::repeat(1.0).take(20));
        let report = run_losses(&losses, 100.min(losses.len()), 10);

        assert_eq!(report.epochs_run(), 13);
        assert_eq!(
            report.stop_reason,
            StopReason::EarlyStopped { best_loss: 1.0, best_epoch: 3 }
        );
    }

    #[test]
    fn test_improving_run_hits_epoch_cap() {
        let losses: Vec<f64> = (0..8).map(|i| 1.0 / (i + 1) as f64).collect();
        let report = run_losses(&losses, 8, 2);
        assert_eq!(report.epochs_run(), 8);
        assert_eq!(report.stop_reason, StopReason::EpochCap);
        assert_eq!(report.final_train_loss(), Some(1.0 / 8.0));
    }

    #[test]
    fn test_nan_loss_is_not_an_improvement() {
        let mut stopping = EarlyStopping::new(2);
        assert!(!stopping.update(1, 1.0));
        assert!(!stopping.update(2, f64::NAN));
        assert!(stopping.update(3, f64::NAN));
        assert_eq!(stopping.best_loss(), 1.0);
    }

    #[test]
    fn test_progress_sees_every_epoch() {
        let mut seen = Vec::new();
        let _ = run_epochs(
            (),
            4,
            10,
            |state, epoch| Ok((state, metrics(epoch, 1.0 / epoch as f64))),
            |m| seen.push(m.epoch),
        )
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_epoch_error_propagates() {
        let result = run_epochs(
            0usize,
            5,
            10,
            |state, epoch| {
                if epoch == 2 {
                    Err(Error::Shape("broken batch".to_string()))
                } else {
                    Ok((state + 1, metrics(epoch, 1.0)))
                }
            },
            |_| {},
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_count_correct() {
        let device = NdArrayDevice::Cpu;
        let logits = Tensor::<NdArray<f32>, 1>::from_floats([0.1, 0.9, 0.8, 0.2, 0.3, 0.7], &device)
            .reshape([3, 2]);
        let targets = Tensor::<NdArray<f32>, 1>::from_floats([0.0, 1.0, 0.0, 1.0, 0.0, 1.0], &device)
            .reshape([3, 2]);
        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_tiny_training_run() {
        let device = NdArrayDevice::Cpu;
        let dataset = fixtures::train_dataset(20, 8, 8);
        let mut rng = make_rng(Some(1));
        let split = train_valid_split(&dataset, 0.2, &mut rng).unwrap();

        let model = ModelConfig::new(NUM_CLASSES)
            .with_stem_channels(4)
            .with_stage_widths(vec![4, 8])
            .with_stage_depths(vec![1, 1])
            .init::<TestBackend>(&device);

        let training = TrainingSettings {
            batch_size: 8,
            num_epochs: 2,
            seed: Some(3),
            ..TrainingSettings::default()
        };
        let mut epochs = 0;
        let (_, report) = train_model(
            model,
            &split,
            &training,
            &AugmentationSettings::default(),
            &device,
            |_| epochs += 1,
        )
        .unwrap();

        assert_eq!(epochs, 2);
        assert_eq!(report.epochs_run(), 2);
        assert_eq!(report.stop_reason, StopReason::EpochCap);
        for m in &report.history {
            assert!(m.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&m.valid_accuracy));
        }
    }
}
