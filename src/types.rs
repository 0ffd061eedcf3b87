use serde::{Deserialize, Serialize};

/// 行動クラス数
pub const NUM_CLASSES: usize = 15;

/// クラス名の定義（one-hotのインデックス順）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "sitting", "sleeping", "running", "cycling", "texting", "calling", "eating",
    "clapping", "drinking", "hugging", "using_laptop", "laughing",
    "listening_to_music", "fighting", "dancing",
];

/// RGB画像のチャネル数
pub const IMAGE_CHANNELS: usize = 3;

/// クラスインデックスから行動名を取得
pub fn action_name(index: usize) -> Option<&'static str> {
    CLASS_NAMES.get(index).copied()
}

/// 画像1枚の形状 (H, W, C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self { height, width, channels }
    }

    /// 1枚あたりの要素数
    pub fn values_per_image(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// 1枚あたりの要素数（溢れる場合はNone）
    pub fn checked_values_per_image(&self) -> Option<usize> {
        self.height
            .checked_mul(self.width)?
            .checked_mul(self.channels)
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}
