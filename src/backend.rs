//! 計算バックエンドの型定義

use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};

/// CPU (NdArray) バックエンド
pub type CpuBackend = NdArray<f32>;
/// CPU 学習用バックエンド
pub type CpuAutodiffBackend = Autodiff<CpuBackend>;

/// CPUデバイス
pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// GPU (WGPU) バックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn_wgpu::Wgpu;
/// GPU 学習用バックエンド
#[cfg(feature = "wgpu")]
pub type GpuAutodiffBackend = Autodiff<GpuBackend>;

/// 既定のGPUデバイス
#[cfg(feature = "wgpu")]
pub fn gpu_device() -> burn_wgpu::WgpuDevice {
    burn_wgpu::WgpuDevice::default()
}
