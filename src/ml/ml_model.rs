//! 行動分類用の残差CNN
//!
//! ステム → 最大プーリング → 残差ブロック列 → 大域平均プーリング → 全結合 → Softmax

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::Conv2d,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Tensor,
    },
};

use crate::ml::residual::{conv_no_bias, ResidualBlock, ResidualBlockConfig};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ステム畳み込みの出力チャネル数
    #[config(default = 64)]
    pub stem_channels: usize,
    /// ステージごとのチャネル数
    #[config(default = "vec![64, 128, 256, 512]")]
    pub stage_widths: Vec<usize>,
    /// ステージごとのブロック数
    #[config(default = "vec![3, 4, 6, 3]")]
    pub stage_depths: Vec<usize>,
}

impl ModelConfig {
    /// ブロックごとの出力チャネル数
    pub fn block_widths(&self) -> Vec<usize> {
        self.stage_widths
            .iter()
            .zip(&self.stage_depths)
            .flat_map(|(&width, &depth)| std::iter::repeat(width).take(depth))
            .collect()
    }

    /// ブロックごとのストライド（直前と同じ幅なら1、変わるなら2）
    pub fn block_strides(&self) -> Vec<usize> {
        let mut previous = self.stem_channels;
        self.block_widths()
            .into_iter()
            .map(|width| {
                let stride = if width == previous { 1 } else { 2 };
                previous = width;
                stride
            })
            .collect()
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ActionClassifier<B> {
        let mut blocks = Vec::new();
        let mut in_channels = self.stem_channels;
        for (width, stride) in self.block_widths().into_iter().zip(self.block_strides()) {
            blocks.push(
                ResidualBlockConfig::new(in_channels, width)
                    .with_stride(stride)
                    .init(device),
            );
            in_channels = width;
        }

        tracing::debug!(
            blocks = blocks.len(),
            features = in_channels,
            "モデルを構築しました"
        );

        ActionClassifier {
            stem_conv: conv_no_bias(3, self.stem_channels, 7, 2, device),
            stem_bn: BatchNormConfig::new(self.stem_channels).init(device),
            stem_pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_channels, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 行動分類モデル
///
/// 入力は (N, 3, H, W)、出力は (N, num_classes)。
#[derive(Module, Debug)]
pub struct ActionClassifier<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: BatchNorm<B>,
    stem_pool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ActionClassifier<B> {
    /// 順伝播（ロジットを返す）
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem_conv.forward(images);
        let x = self.stem_bn.forward(x);
        let x = self.activation.forward(x);
        let mut x = self.stem_pool.forward(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.fc.forward(x)
    }

    /// クラス確率（各行の和は1）
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 戻り値は (損失, ロジット)。
    pub fn forward_loss(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 2>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(images);
        let loss = categorical_cross_entropy(logits.clone(), targets);
        (loss, logits)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// one-hotターゲットに対する交差エントロピー `-Σ y·log_softmax(z)` のバッチ平均
pub fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (targets * log_probs).sum_dim(1).mean().neg()
}
