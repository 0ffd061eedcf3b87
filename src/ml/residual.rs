//! 残差ブロック

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// 残差ブロックの設定
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// 1つ目の畳み込みとショートカットのストライド
    #[config(default = 1)]
    pub stride: usize,
}

impl ResidualBlockConfig {
    /// ストライドが1でないか幅が変わるときは射影ショートカットが必要
    pub fn needs_projection(&self) -> bool {
        self.stride != 1 || self.in_channels != self.out_channels
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBlock<B> {
        let shortcut = if self.needs_projection() {
            Some(Projection {
                conv: conv_no_bias(self.in_channels, self.out_channels, 1, self.stride, device),
                bn: BatchNormConfig::new(self.out_channels).init(device),
            })
        } else {
            None
        };

        ResidualBlock {
            conv1: conv_no_bias(self.in_channels, self.out_channels, 3, self.stride, device),
            bn1: BatchNormConfig::new(self.out_channels).init(device),
            conv2: conv_no_bias(self.out_channels, self.out_channels, 3, 1, device),
            bn2: BatchNormConfig::new(self.out_channels).init(device),
            shortcut,
            activation: Relu::new(),
        }
    }
}

/// バイアス無しの正方カーネル畳み込み
///
/// パディング `(k-1)/2` で出力サイズは `ceil(in / stride)` になる。
pub(crate) fn conv_no_bias<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = (kernel - 1) / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

/// 1x1畳み込み + BatchNorm のショートカット
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Projection<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 残差ブロック
///
/// - 主経路: Conv3x3(stride) → BN → ReLU → Conv3x3 → BN
/// - ショートカット: 恒等写像、または Conv1x1(stride) → BN
/// - 出力: ReLU(主経路 + ショートカット)
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    shortcut: Option<Projection<B>>,
    activation: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(input.clone());
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        let skip = match &self.shortcut {
            Some(projection) => projection.forward(input),
            None => input,
        };

        self.activation.forward(x + skip)
    }

    pub fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}
