//! Backend selection
//!
//! Sessions are generic over the burn backend. Enable one via feature flags:
//!
//! - `ndarray`: CPU backend using ndarray (default)
//! - `tch`: libtorch backend (CUDA, MPS)
//! - `wgpu`: WebGPU backend
//! - `cuda`: native CUDA backend
//!
//! ```ignore
//! use diffpro::backends::{default_device, DefaultBackend};
//! use diffpro::{DiffusionParams, InferenceSession};
//!
//! let device = default_device();
//! let mut session =
//!     InferenceSession::<DefaultBackend, _>::from_model_dir(unet, "checkpoints/prmat2c", device)?;
//! let x0 = session.predict(16, false, Some(100))?;
//! ```

#[cfg(feature = "ndarray")]
pub use burn_ndarray::{NdArray, NdArrayDevice};

#[cfg(feature = "tch")]
pub use burn_tch::{LibTorch, LibTorchDevice};

#[cfg(feature = "wgpu")]
pub use burn_wgpu::{Wgpu, WgpuDevice};

#[cfg(feature = "cuda")]
pub use burn_cuda::{Cuda, CudaDevice};

/// Type alias for the default backend when using ndarray feature
#[cfg(feature = "ndarray")]
pub type DefaultBackend = NdArray;

/// Type alias for the default backend when using tch feature
#[cfg(all(feature = "tch", not(feature = "ndarray")))]
pub type DefaultBackend = LibTorch;

/// Type alias for the default backend when using wgpu feature
#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch"))))]
pub type DefaultBackend = Wgpu;

/// Type alias for the default backend when using cuda feature
#[cfg(all(
    feature = "cuda",
    not(any(feature = "ndarray", feature = "tch", feature = "wgpu"))
))]
pub type DefaultBackend = Cuda;

/// Get the default device for the enabled backend
#[cfg(feature = "ndarray")]
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}

/// Get the default device for the enabled backend
#[cfg(all(feature = "tch", not(feature = "ndarray")))]
pub fn default_device() -> LibTorchDevice {
    // Try to use CUDA if available, otherwise CPU
    if burn_tch::is_cuda_available() {
        LibTorchDevice::Cuda(0)
    } else {
        LibTorchDevice::Cpu
    }
}

/// Get the default device for the enabled backend
#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch"))))]
pub fn default_device() -> WgpuDevice {
    WgpuDevice::default()
}

/// Get the default device for the enabled backend
#[cfg(all(
    feature = "cuda",
    not(any(feature = "ndarray", feature = "tch", feature = "wgpu"))
))]
pub fn default_device() -> CudaDevice {
    CudaDevice::default()
}

#[cfg(test)]
mod tests {
    #[cfg(any(
        feature = "ndarray",
        feature = "tch",
        feature = "wgpu",
        feature = "cuda"
    ))]
    use super::*;

    #[test]
    #[cfg(any(
        feature = "ndarray",
        feature = "tch",
        feature = "wgpu",
        feature = "cuda"
    ))]
    fn test_default_device() {
        let device = default_device();
        let x = burn::tensor::Tensor::<DefaultBackend, 4>::zeros([1, 2, 4, 4], &device);
        assert_eq!(x.dims(), [1, 2, 4, 4]);
    }
}
