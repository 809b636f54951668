//! Load piano-roll tensors from .safetensors files

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use burn::prelude::*;
use half::{bf16, f16};
use memmap2::{Mmap, MmapOptions};
use safetensors::{Dtype, SafeTensors};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    #[error("Unsupported dtype: {0:?}")]
    UnsupportedDtype(Dtype),

    #[error("Rank mismatch for {name}: expected {expected}, got shape {actual:?}")]
    RankMismatch {
        name: String,
        expected: usize,
        actual: Vec<usize>,
    },
}

/// A memory-mapped safetensors file
pub struct SafeTensorFile {
    mmap: Mmap,
    // name -> (dtype, shape, byte range in the mmap)
    tensors: HashMap<String, TensorInfo>,
}

struct TensorInfo {
    dtype: Dtype,
    shape: Vec<usize>,
    start: usize,
    end: usize,
}

impl SafeTensorFile {
    /// Open a safetensors file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let file = File::open(path)?;
        // Safety: the file is only read, and the map is owned by the returned value
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let st = SafeTensors::deserialize(&mmap)?;
        let base = mmap.as_ptr() as usize;

        let mut tensors = HashMap::new();
        for (name, view) in st.tensors() {
            let start = view.data().as_ptr() as usize - base;
            tensors.insert(
                name.to_string(),
                TensorInfo {
                    dtype: view.dtype(),
                    shape: view.shape().to_vec(),
                    start,
                    end: start + view.data().len(),
                },
            );
        }

        Ok(Self { mmap, tensors })
    }

    /// Get tensor shape
    pub fn shape(&self, name: &str) -> Option<&[usize]> {
        self.tensors.get(name).map(|t| t.shape.as_slice())
    }

    fn info(&self, name: &str) -> Result<&TensorInfo, LoadError> {
        self.tensors
            .get(name)
            .ok_or_else(|| LoadError::TensorNotFound(name.to_string()))
    }

    /// Read a tensor's values as f32 on the host, with its shape
    ///
    /// f16, bf16 and f64 data is converted. Bytes are read little-endian
    /// without assuming alignment.
    pub fn read_f32(&self, name: &str) -> Result<(Vec<f32>, Vec<usize>), LoadError> {
        let info = self.info(name)?;
        let data = &self.mmap[info.start..info.end];

        let floats: Vec<f32> = match info.dtype {
            Dtype::F32 => data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            Dtype::F16 => data
                .chunks_exact(2)
                .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
                .collect(),
            Dtype::BF16 => data
                .chunks_exact(2)
                .map(|c| bf16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
                .collect(),
            Dtype::F64 => data
                .chunks_exact(8)
                .map(|c| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(c);
                    f64::from_le_bytes(bytes) as f32
                })
                .collect(),
            dtype => return Err(LoadError::UnsupportedDtype(dtype)),
        };

        Ok((floats, info.shape.clone()))
    }

    /// Load a tensor of rank `D` as f32
    pub fn load_f32<B: Backend, const D: usize>(
        &self,
        name: &str,
        device: &B::Device,
    ) -> Result<Tensor<B, D>, LoadError> {
        let (floats, shape) = self.read_f32(name)?;
        let dims: [usize; D] = shape
            .clone()
            .try_into()
            .map_err(|_| LoadError::RankMismatch {
                name: name.to_string(),
                expected: D,
                actual: shape,
            })?;

        Ok(Tensor::from_data(TensorData::new(floats, dims), device))
    }
}
