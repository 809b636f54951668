//! Sources of real samples used to seed conditional generation
//!
//! A conditional run forward-noises a real piano roll to the start step and
//! denoises from there. The source decides which sample that is and names it
//! for the export labels.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use burn::prelude::*;

use crate::loader::SafeTensorFile;

/// Tensor name holding the 2-channel piano roll in a song file
pub const PRMAT_TENSOR: &str = "prmat2c";

/// Provider of the conditioning sample
pub trait ConditioningSource<B: Backend> {
    /// Pick a sample and return its identifier and data `[batch, C, H, W]`
    fn select(&mut self, device: &B::Device) -> anyhow::Result<(String, Tensor<B, 4>)>;
}

impl<B: Backend, S: ConditioningSource<B> + ?Sized> ConditioningSource<B> for Box<S> {
    fn select(&mut self, device: &B::Device) -> anyhow::Result<(String, Tensor<B, 4>)> {
        (**self).select(device)
    }
}

/// A single in-memory sample
#[derive(Debug, Clone)]
pub struct FixedConditioning<B: Backend> {
    name: String,
    data: Tensor<B, 4>,
}

impl<B: Backend> FixedConditioning<B> {
    pub fn new(name: impl Into<String>, data: Tensor<B, 4>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl<B: Backend> ConditioningSource<B> for FixedConditioning<B> {
    fn select(&mut self, device: &B::Device) -> anyhow::Result<(String, Tensor<B, 4>)> {
        Ok((self.name.clone(), self.data.clone().to_device(device)))
    }
}

/// A directory of `.safetensors` songs, each holding a `prmat2c` tensor
///
/// Songs are listed in file-name order and picked by index. The identifier
/// of a song is its file stem.
#[derive(Debug, Clone)]
pub struct SongLibrary {
    songs: Vec<PathBuf>,
    selected: usize,
}

impl SongLibrary {
    /// Scan `dir` for `.safetensors` files
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut songs = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("Failed to read song directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "safetensors") {
                songs.push(path);
            }
        }
        songs.sort();
        if songs.is_empty() {
            bail!("No .safetensors songs in {}", dir.display());
        }
        log::info!("Song library {}: {} songs", dir.display(), songs.len());
        Ok(Self { songs, selected: 0 })
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Song identifiers in selection order
    pub fn names(&self) -> Vec<String> {
        self.songs.iter().map(|p| song_name(p)).collect()
    }

    /// Index of the song `select` returns
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Choose the song `select` returns
    pub fn select_index(&mut self, index: usize) -> anyhow::Result<()> {
        if index >= self.songs.len() {
            bail!(
                "Song index {} out of range for {} songs",
                index,
                self.songs.len()
            );
        }
        self.selected = index;
        Ok(())
    }

    /// Builder form of [`select_index`](Self::select_index)
    pub fn with_index(mut self, index: usize) -> anyhow::Result<Self> {
        self.select_index(index)?;
        Ok(self)
    }

    /// Load song `index` as `[N, C, H, W]`
    ///
    /// A `[C, H, W]` tensor is a single segment and loads with `N = 1`.
    pub fn load<B: Backend>(
        &self,
        index: usize,
        device: &B::Device,
    ) -> anyhow::Result<Tensor<B, 4>> {
        let path = self
            .songs
            .get(index)
            .with_context(|| format!("Song index {index} out of range"))?;
        let file = SafeTensorFile::open(path)
            .with_context(|| format!("Failed to open song {}", path.display()))?;
        let rank = file
            .shape(PRMAT_TENSOR)
            .map(|s| s.len())
            .with_context(|| format!("No {PRMAT_TENSOR} tensor in {}", path.display()))?;

        let data = match rank {
            3 => file
                .load_f32::<B, 3>(PRMAT_TENSOR, device)
                .map(|x| x.unsqueeze::<4>()),
            _ => file.load_f32::<B, 4>(PRMAT_TENSOR, device),
        }
        .with_context(|| format!("Failed to read {PRMAT_TENSOR} from {}", path.display()))?;
        log::debug!("Loaded {} with shape {:?}", path.display(), data.dims());
        Ok(data)
    }
}

impl<B: Backend> ConditioningSource<B> for SongLibrary {
    fn select(&mut self, device: &B::Device) -> anyhow::Result<(String, Tensor<B, 4>)> {
        let name = song_name(&self.songs[self.selected]);
        let data = self.load::<B>(self.selected, device)?;
        log::info!("Conditioning on song {name}");
        Ok((name, data))
    }
}

fn song_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
