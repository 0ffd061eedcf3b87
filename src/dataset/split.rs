//! 学習用・検証用への分割

use rand::seq::SliceRandom;
use rand::Rng;

use crate::dataset::TrainDataset;
use crate::error::{Error, Result};

/// 分割結果（元データでのインデックスも保持）
#[derive(Debug, Clone)]
pub struct Split {
    pub train: TrainDataset,
    pub validation: TrainDataset,
    pub train_indices: Vec<usize>,
    pub validation_indices: Vec<usize>,
}

/// 検証用に回す件数 `ceil(total * ratio)`
pub fn validation_count(total: usize, valid_ratio: f64) -> usize {
    (total as f64 * valid_ratio).ceil() as usize
}

/// インデックスをシャッフルし、先頭を検証用、残りを学習用にする
///
/// 画像とラベルの対応は保持される。どの行がどちらに入るかは乱数次第。
pub fn train_valid_split<R: Rng + ?Sized>(
    dataset: &TrainDataset,
    valid_ratio: f64,
    rng: &mut R,
) -> Result<Split> {
    if !(valid_ratio > 0.0 && valid_ratio < 1.0) {
        return Err(Error::Config(format!(
            "validation ratio must be in (0, 1), got {}",
            valid_ratio
        )));
    }

    let total = dataset.len();
    let n_valid = validation_count(total, valid_ratio);
    if n_valid >= total {
        return Err(Error::Config(format!(
            "{} samples with validation ratio {} leaves no training data",
            total, valid_ratio
        )));
    }

    let mut indices: Vec<usize> = (0..total).collect();
    indices.shuffle(rng);
    let train_indices = indices.split_off(n_valid);
    let validation_indices = indices;

    tracing::debug!(
        train = train_indices.len(),
        validation = validation_indices.len(),
        "データセットを分割しました"
    );

    Ok(Split {
        train: dataset.select(&train_indices),
        validation: dataset.select(&validation_indices),
        train_indices,
        validation_indices,
    })
}
