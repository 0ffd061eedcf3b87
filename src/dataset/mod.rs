//! 学習・テスト用データセット
//!
//! 画像はNHWC順の `f32` で保持し、ロード後は変更しません。

pub mod archive;
pub mod augmentation;
pub mod batcher;
pub mod npy;
pub mod preview;
pub mod split;

pub use archive::{load_test_dataset, load_train_dataset, write_test_archive, write_train_archive};
pub use augmentation::{Augmenter, BatchGenerator};
pub use batcher::{ImageBatch, ImageBatcher};
pub use split::{train_valid_split, Split};

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::types::{ImageShape, IMAGE_CHANNELS, NUM_CLASSES};

/// 形状の揃った画像の集合
#[derive(Debug, Clone)]
pub struct ImageSet {
    shape: ImageShape,
    pixels: Vec<f32>,
}

impl ImageSet {
    pub fn new(shape: ImageShape, pixels: Vec<f32>) -> Result<Self> {
        if shape.channels != IMAGE_CHANNELS {
            return Err(Error::Shape(format!(
                "images must have {} channels, found {}",
                IMAGE_CHANNELS, shape.channels
            )));
        }
        if shape.height == 0 || shape.width == 0 {
            return Err(Error::Shape(format!("empty image size {}", shape)));
        }
        let per_image = shape
            .checked_values_per_image()
            .ok_or_else(|| Error::Shape(format!("image size {} overflows", shape)))?;
        if pixels.len() % per_image != 0 {
            return Err(Error::Shape(format!(
                "{} values cannot be split into images of shape {}",
                pixels.len(),
                shape
            )));
        }
        Ok(Self { shape, pixels })
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.pixels.len() / self.shape.values_per_image()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// index番目の画像 (H, W, C)
    pub fn image(&self, index: usize) -> &[f32] {
        let size = self.shape.values_per_image();
        &self.pixels[index * size..(index + 1) * size]
    }

    /// 連続した範囲の画像をまとめて取得
    pub fn images(&self, range: std::ops::Range<usize>) -> &[f32] {
        let size = self.shape.values_per_image();
        &self.pixels[range.start * size..range.end * size]
    }

    fn select(&self, indices: &[usize]) -> Self {
        let mut pixels = Vec::with_capacity(indices.len() * self.shape.values_per_image());
        for &index in indices {
            pixels.extend_from_slice(self.image(index));
        }
        Self {
            shape: self.shape,
            pixels,
        }
    }
}

/// one-hotラベル付きの学習データ
#[derive(Debug, Clone)]
pub struct TrainDataset {
    images: ImageSet,
    targets: Vec<f32>,
}

impl TrainDataset {
    /// ラベル数とone-hot性を検証して作成
    pub fn new(images: ImageSet, targets: Vec<f32>) -> Result<Self> {
        if targets.len() != images.len() * NUM_CLASSES {
            return Err(Error::Shape(format!(
                "{} images need {} target values, found {}",
                images.len(),
                images.len() * NUM_CLASSES,
                targets.len()
            )));
        }

        for (row, label) in targets.chunks_exact(NUM_CLASSES).enumerate() {
            let non_zero: Vec<f32> = label.iter().copied().filter(|v| *v != 0.0).collect();
            if non_zero.len() != 1 {
                return Err(Error::InvalidLabel {
                    row,
                    detail: format!("{} non-zero entries", non_zero.len()),
                });
            }
            if (non_zero[0] - 1.0).abs() > 1e-6 {
                return Err(Error::InvalidLabel {
                    row,
                    detail: format!("hot entry is {}", non_zero[0]),
                });
            }
        }

        Ok(Self { images, targets })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &ImageSet {
        &self.images
    }

    pub fn shape(&self) -> ImageShape {
        self.images.shape()
    }

    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    pub fn target(&self, index: usize) -> &[f32] {
        &self.targets[index * NUM_CLASSES..(index + 1) * NUM_CLASSES]
    }

    /// one-hotラベルのクラスインデックス
    pub fn class_index(&self, index: usize) -> usize {
        self.target(index)
            .iter()
            .position(|v| *v != 0.0)
            .unwrap_or_default()
    }

    /// 指定した行だけを取り出す（行の対応は保持）
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut targets = Vec::with_capacity(indices.len() * NUM_CLASSES);
        for &index in indices {
            targets.extend_from_slice(self.target(index));
        }
        Self {
            images: self.images.select(indices),
            targets,
        }
    }
}

/// バッチ化前の1サンプル
#[derive(Clone, Debug)]
pub struct LabeledImage {
    /// (H, W, C) で平坦化した画素
    pub pixels: Vec<f32>,
    /// one-hotラベル
    pub target: Vec<f32>,
}

impl Dataset<LabeledImage> for TrainDataset {
    fn get(&self, index: usize) -> Option<LabeledImage> {
        if index >= self.len() {
            return None;
        }
        Some(LabeledImage {
            pixels: self.images.image(index).to_vec(),
            target: self.target(index).to_vec(),
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// ファイル名付きのテストデータ
#[derive(Debug, Clone)]
pub struct TestDataset {
    images: ImageSet,
    names: Vec<String>,
}

impl TestDataset {
    pub fn new(images: ImageSet, names: Vec<String>) -> Result<Self> {
        if names.len() != images.len() {
            return Err(Error::Shape(format!(
                "{} images but {} names",
                images.len(),
                names.len()
            )));
        }
        Ok(Self { images, names })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &ImageSet {
        &self.images
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// シード指定があれば固定、なければエントロピーから乱数生成器を作る
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// クラス `i % 15` のone-hotを持つ、値がインデックスで埋まった画像群
    pub fn train_dataset(count: usize, height: usize, width: usize) -> TrainDataset {
        let shape = ImageShape::new(height, width, IMAGE_CHANNELS);
        let mut pixels = Vec::with_capacity(count * shape.values_per_image());
        let mut targets = vec![0.0; count * NUM_CLASSES];
        for i in 0..count {
            pixels.extend(std::iter::repeat(i as f32).take(shape.values_per_image()));
            targets[i * NUM_CLASSES + i % NUM_CLASSES] = 1.0;
        }
        TrainDataset::new(ImageSet::new(shape, pixels).unwrap(), targets).unwrap()
    }

    pub fn test_dataset(names: &[&str], height: usize, width: usize) -> TestDataset {
        let shape = ImageShape::new(height, width, IMAGE_CHANNELS);
        let pixels: Vec<f32> = (0..names.len() * shape.values_per_image())
            .map(|v| (v % 251) as f32)
            .collect();
        TestDataset::new(
            ImageSet::new(shape, pixels).unwrap(),
            names.iter().map(|n| n.to_string()).collect(),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_one_hot_labels() {
        let shape = ImageShape::new(2, 2, 3);
        let images = ImageSet::new(shape, vec![0.0; 2 * 12]).unwrap();

        let mut targets = vec![0.0; 2 * NUM_CLASSES];
        targets[0] = 1.0;
        targets[NUM_CLASSES] = 0.5;
        targets[NUM_CLASSES + 1] = 0.5;

        let err = TrainDataset::new(images, targets).unwrap_err();
        assert!(matches!(err, Error::InvalidLabel { row: 1, .. }));
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let shape = ImageShape::new(2, 2, 1);
        assert!(matches!(ImageSet::new(shape, vec![0.0; 4]), Err(Error::Shape(_))));
    }

    #[test]
    fn test_select_keeps_image_label_alignment() {
        let dataset = fixtures::train_dataset(20, 2, 2);
        let subset = dataset.select(&[17, 3]);
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.images().image(0)[0], 17.0);
        assert_eq!(subset.class_index(0), 17 % NUM_CLASSES);
        assert_eq!(subset.images().image(1)[0], 3.0);
        assert_eq!(subset.class_index(1), 3);
    }

    #[test]
    fn test_dataset_trait_bounds() {
        let dataset = fixtures::train_dataset(3, 2, 2);
        assert_eq!(Dataset::len(&dataset), 3);
        assert!(dataset.get(2).is_some());
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn test_overflowing_image_size_is_rejected() {
        let shape = ImageShape::new(usize::MAX / 2, 4, 3);
        assert!(matches!(ImageSet::new(shape, Vec::new()), Err(Error::Shape(_))));
    }

    #[test]
    fn test_names_must_match_images() {
        let shape = ImageShape::new(1, 1, 3);
        let images = ImageSet::new(shape, vec![0.0; 6]).unwrap();
        assert!(TestDataset::new(images, vec!["a_1.png".to_string()]).is_err());
    }
}
