//! データ拡張とバッチ生成
//!
//! 拡張は学習バッチ生成時にのみ適用します（平行移動・左右反転）。

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::dataset::LabeledImage;
use crate::model::config::AugmentationSettings;
use crate::types::ImageShape;

/// ランダムな平行移動と左右反転を行う拡張器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmenter {
    /// 幅に対する最大シフト量の割合
    width_shift: f32,
    /// 高さに対する最大シフト量の割合
    height_shift: f32,
    horizontal_flip: bool,
    rescale: f32,
}

impl Augmenter {
    pub fn new(settings: &AugmentationSettings) -> Self {
        Self {
            width_shift: settings.width_shift,
            height_shift: settings.height_shift,
            horizontal_flip: settings.horizontal_flip,
            rescale: settings.rescale,
        }
    }

    /// スケーリングのみ行う拡張器
    pub fn rescale_only(rescale: f32) -> Self {
        Self {
            width_shift: 0.0,
            height_shift: 0.0,
            horizontal_flip: false,
            rescale,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.width_shift <= 0.0
            && self.height_shift <= 0.0
            && !self.horizontal_flip
            && self.rescale == 1.0
    }

    /// 1枚の画像 (H, W, C) にランダムな変換を適用
    pub fn apply<R: Rng + ?Sized>(&self, pixels: &[f32], shape: ImageShape, rng: &mut R) -> Vec<f32> {
        let dx = sample_shift(self.width_shift, shape.width, rng);
        let dy = sample_shift(self.height_shift, shape.height, rng);
        let flip = self.horizontal_flip && rng.gen_bool(0.5);

        let mut out = shift_and_flip(pixels, shape, dx, dy, flip);
        if self.rescale != 1.0 {
            for value in &mut out {
                *value *= self.rescale;
            }
        }
        out
    }
}

/// ±range*extent の一様乱数を整数ピクセルに丸める
fn sample_shift<R: Rng + ?Sized>(range: f32, extent: usize, rng: &mut R) -> i64 {
    if range <= 0.0 {
        return 0;
    }
    let max = range as f64 * extent as f64;
    rng.gen_range(-max..=max).round() as i64
}

/// 内容を (dx, dy) だけずらし、必要なら左右反転する
///
/// はみ出した領域は最も近い端の画素で埋める。
pub fn shift_and_flip(pixels: &[f32], shape: ImageShape, dx: i64, dy: i64, flip: bool) -> Vec<f32> {
    let (h, w, c) = (shape.height as i64, shape.width as i64, shape.channels);
    let mut out = Vec::with_capacity(pixels.len());

    for y in 0..h {
        let src_y = (y - dy).clamp(0, h - 1);
        for x in 0..w {
            let mirrored = if flip { w - 1 - x } else { x };
            let src_x = (mirrored - dx).clamp(0, w - 1);
            let start = ((src_y * w + src_x) as usize) * c;
            out.extend_from_slice(&pixels[start..start + c]);
        }
    }
    out
}

/// 無限に続くバッチ列
///
/// 1パス = `steps_per_epoch()` バッチ（最後は端数）で、パスの先頭で再シャッフルする。
pub struct BatchGenerator<'a, D> {
    dataset: &'a D,
    shape: ImageShape,
    batch_size: usize,
    shuffle: bool,
    augmenter: Augmenter,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl<'a, D: Dataset<LabeledImage>> BatchGenerator<'a, D> {
    pub fn new(
        dataset: &'a D,
        shape: ImageShape,
        batch_size: usize,
        augmenter: Augmenter,
        rng: StdRng,
    ) -> Self {
        Self {
            dataset,
            shape,
            batch_size,
            shuffle: true,
            augmenter,
            rng,
            order: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// 1エポックあたりのバッチ数
    pub fn steps_per_epoch(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// ちょうど1パス分のバッチを返すイテレータ
    ///
    /// 途中まで進んでいたパスは破棄して新しいパスから始める。
    pub fn epoch(&mut self) -> std::iter::Take<&mut Self> {
        self.cursor = self.order.len();
        let steps = self.steps_per_epoch();
        self.by_ref().take(steps)
    }

    fn start_pass(&mut self) {
        self.order = (0..self.dataset.len()).collect();
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        self.cursor = 0;
    }
}

impl<'a, D: Dataset<LabeledImage>> Iterator for BatchGenerator<'a, D> {
    type Item = Vec<LabeledImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.dataset.len() == 0 || self.batch_size == 0 {
            return None;
        }
        if self.cursor >= self.order.len() {
            self.start_pass();
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let mut batch = Vec::with_capacity(end - self.cursor);
        for &index in &self.order[self.cursor..end] {
            if let Some(mut item) = self.dataset.get(index) {
                if !self.augmenter.is_identity() {
                    item.pixels = self.augmenter.apply(&item.pixels, self.shape, &mut self.rng);
                }
                batch.push(item);
            }
        }
        self.cursor = end;

        Some(batch)
    }
}
