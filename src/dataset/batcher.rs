//! サンプル列からテンソルバッチへの変換

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use crate::dataset::LabeledImage;
use crate::types::{ImageShape, NUM_CLASSES};

/// モデル入力用のバッチ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// (N, C, H, W)
    pub images: Tensor<B, 4>,
    /// one-hot (N, 15)
    pub targets: Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    shape: ImageShape,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, shape: ImageShape) -> Self {
        Self { device, shape }
    }
}

impl<B: Backend> Batcher<B, LabeledImage, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<LabeledImage>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();

        let mut pixels = Vec::with_capacity(batch_size * self.shape.values_per_image());
        let mut targets = Vec::with_capacity(batch_size * NUM_CLASSES);
        for item in &items {
            pixels.extend_from_slice(&item.pixels);
            targets.extend_from_slice(&item.target);
        }

        let images = images_to_tensor::<B>(&pixels, batch_size, self.shape, &self.device);
        let targets = Tensor::<B, 1>::from_floats(targets.as_slice(), &self.device)
            .reshape([batch_size, NUM_CLASSES]);

        ImageBatch { images, targets }
    }
}

/// NHWCで平坦化された画素を (N, C, H, W) テンソルにする
pub fn images_to_tensor<B: Backend>(
    pixels: &[f32],
    count: usize,
    shape: ImageShape,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(pixels, device)
        .reshape([count, shape.height, shape.width, shape.channels])
        .permute([0, 3, 1, 2])
}
