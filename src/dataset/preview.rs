//! サンプル画像のプレビュー出力

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use crate::dataset::TrainDataset;
use crate::error::{Error, Result};
use crate::types::action_name;

/// index番目の学習画像をPNGとして保存し、そのパスを返す
///
/// ファイル名は `sample_{index}_{action}.png`。
/// 値の最大が1以下なら [0, 1] とみなして255倍する。
pub fn save_sample_preview(dataset: &TrainDataset, index: usize, dir: &Path) -> Result<PathBuf> {
    if index >= dataset.len() {
        return Err(Error::Config(format!(
            "preview index {} is out of range for {} samples",
            index,
            dataset.len()
        )));
    }

    let shape = dataset.shape();
    let pixels = dataset.images().image(index);
    let max = pixels.iter().copied().fold(f32::MIN, f32::max);
    let scale = if max <= 1.0 { 255.0 } else { 1.0 };

    let mut img = RgbImage::new(shape.width as u32, shape.height as u32);
    for (i, rgb) in pixels.chunks_exact(shape.channels).enumerate() {
        let x = (i % shape.width) as u32;
        let y = (i / shape.width) as u32;
        let to_u8 = |v: f32| (v * scale).round().clamp(0.0, 255.0) as u8;
        img.put_pixel(x, y, Rgb([to_u8(rgb[0]), to_u8(rgb[1]), to_u8(rgb[2])]));
    }

    let action = action_name(dataset.class_index(index)).unwrap_or("unknown");
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("sample_{}_{}.png", index, action));
    img.save(&path)?;

    tracing::info!("サンプル画像を保存しました: {}", path.display());
    Ok(path)
}
