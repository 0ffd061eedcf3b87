//! 行動画像分類（残差CNN）の学習・推論ライブラリ

pub mod backend;
pub mod dataset;
pub mod error;
pub mod export;
pub mod logging;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod types;

pub use error::{Error, Result};
