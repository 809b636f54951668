//! Persistence of samples as images and note lists
//!
//! A sample batch `[B, C, T, P]` is laid out end to end along time: row `b`
//! occupies time steps `b*T .. (b+1)*T`. Channel 0 holds note onsets and
//! channel 1 sustains.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::prelude::*;
use image::{ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};

/// Values at or above this count as active
pub const NOTE_THRESHOLD: f32 = 0.5;

/// Sink for final samples and diagnostic snapshots
pub trait ExportSink<B: Backend> {
    /// Persist `sample` as a picture under `label`
    fn export_image(&mut self, sample: &Tensor<B, 4>, label: &str) -> anyhow::Result<()>;

    /// Persist `sample` as a note sequence under `label`
    fn export_note_sequence(&mut self, sample: &Tensor<B, 4>, label: &str) -> anyhow::Result<()>;
}

impl<B: Backend, E: ExportSink<B> + ?Sized> ExportSink<B> for Box<E> {
    fn export_image(&mut self, sample: &Tensor<B, 4>, label: &str) -> anyhow::Result<()> {
        (**self).export_image(sample, label)
    }

    fn export_note_sequence(&mut self, sample: &Tensor<B, 4>, label: &str) -> anyhow::Result<()> {
        (**self).export_note_sequence(sample, label)
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExporter;

impl<B: Backend> ExportSink<B> for NullExporter {
    fn export_image(&mut self, _sample: &Tensor<B, 4>, _label: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn export_note_sequence(&mut self, _sample: &Tensor<B, 4>, _label: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes `<label>.png` and `<label>.notes.json` into a directory
#[derive(Debug, Clone)]
pub struct FileExporter {
    dir: PathBuf,
}

impl FileExporter {
    /// Create the exporter, creating `dir` if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image_path(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.png"))
    }

    pub fn notes_path(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.notes.json"))
    }
}

impl<B: Backend> ExportSink<B> for FileExporter {
    fn export_image(&mut self, sample: &Tensor<B, 4>, label: &str) -> anyhow::Result<()> {
        let (width, height, rgb) = piano_roll_rgb(sample)?;
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width as u32, height as u32, rgb)
                .context("Failed to create image buffer")?;
        let path = self.image_path(label);
        img.save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        log::debug!("Saved image {}", path.display());
        Ok(())
    }

    fn export_note_sequence(&mut self, sample: &Tensor<B, 4>, label: &str) -> anyhow::Result<()> {
        let notes = extract_notes(sample)?;
        let path = self.notes_path(label);
        fs::write(&path, serde_json::to_string(&notes)?)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        log::debug!("Saved {} notes to {}", notes.len(), path.display());
        Ok(())
    }
}

/// A note in time-step units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Start time step
    pub onset: usize,
    /// Pitch index along the last axis
    pub pitch: usize,
    /// Length in time steps, at least 1
    pub duration: usize,
}

/// Host copy of a sample with its dims
struct HostRoll {
    values: Vec<f32>,
    dims: [usize; 4],
}

impl HostRoll {
    fn new<B: Backend>(sample: &Tensor<B, 4>) -> anyhow::Result<Self> {
        let dims = sample.dims();
        let values = sample
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to read sample data: {e:?}"))?;
        Ok(Self { values, dims })
    }

    /// Value at global time `time` (batch rows end to end), channel and pitch
    fn at(&self, channel: usize, time: usize, pitch: usize) -> f32 {
        let [_, c, h, w] = self.dims;
        if channel >= c {
            return 0.0;
        }
        let (b, t) = (time / h, time % h);
        self.values[((b * c + channel) * h + t) * w + pitch]
    }

    fn total_time(&self) -> usize {
        self.dims[0] * self.dims[2]
    }

    fn pitches(&self) -> usize {
        self.dims[3]
    }
}

/// Render a sample as RGB bytes: onset in red, sustain in green
///
/// Returns `(width, height, bytes)` with columns = time and rows = pitch.
/// Values are clipped to [0, 1].
pub fn piano_roll_rgb<B: Backend>(
    sample: &Tensor<B, 4>,
) -> anyhow::Result<(usize, usize, Vec<u8>)> {
    let roll = HostRoll::new(sample)?;
    let (width, height) = (roll.total_time(), roll.pitches());

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut rgb = Vec::with_capacity(width * height * 3);
    for pitch in 0..height {
        for time in 0..width {
            rgb.push(to_u8(roll.at(0, time, pitch)));
            rgb.push(to_u8(roll.at(1, time, pitch)));
            rgb.push(0);
        }
    }
    Ok((width, height, rgb))
}

/// Extract notes from the onset and sustain channels
///
/// A note starts wherever the onset channel reaches [`NOTE_THRESHOLD`] and
/// lasts while the sustain channel stays active at that pitch, up to the next
/// onset.
pub fn extract_notes<B: Backend>(sample: &Tensor<B, 4>) -> anyhow::Result<Vec<Note>> {
    let roll = HostRoll::new(sample)?;
    let total = roll.total_time();

    let mut notes = Vec::new();
    for onset in 0..total {
        for pitch in 0..roll.pitches() {
            if roll.at(0, onset, pitch) < NOTE_THRESHOLD {
                continue;
            }
            let mut end = onset + 1;
            while end < total
                && roll.at(1, end, pitch) >= NOTE_THRESHOLD
                && roll.at(0, end, pitch) < NOTE_THRESHOLD
            {
                end += 1;
            }
            notes.push(Note {
                onset,
                pitch,
                duration: end - onset,
            });
        }
    }
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TB = NdArray<f32>;

    /// `[2, 2, 4, 3]` with a few hand-placed notes
    fn sample() -> Tensor<TB, 4> {
        let (b, c, h, w) = (2, 2, 4, 3);
        let mut values = vec![0.0f32; b * c * h * w];
        let mut set = |b: usize, c: usize, t: usize, p: usize, v: f32| {
            values[((b * 2 + c) * h + t) * w + p] = v;
        };
        // pitch 1: onset at t=0, sustained for t=1..2
        set(0, 0, 0, 1, 1.0);
        set(0, 1, 1, 1, 0.8);
        set(0, 1, 2, 1, 0.7);
        // pitch 2: onset at t=3 of row 0, sustained into row 1
        set(0, 0, 3, 2, 0.8);
        set(1, 1, 0, 2, 1.0);
        // pitch 0: onset below threshold is ignored
        set(1, 0, 2, 0, 0.4);
        // pitch 0: repeated onsets split notes
        set(1, 0, 1, 0, 2.0);
        set(1, 1, 2, 0, 1.0);
        set(1, 0, 3, 0, 1.0);
        Tensor::from_data(TensorData::new(values, [b, c, h, w]), &Default::default())
    }

    #[test]
    fn test_extract_notes() {
        let notes = extract_notes(&sample()).unwrap();
        assert_eq!(
            notes,
            vec![
                Note { onset: 0, pitch: 1, duration: 3 },
                Note { onset: 3, pitch: 2, duration: 2 },
                Note { onset: 5, pitch: 0, duration: 2 },
                Note { onset: 7, pitch: 0, duration: 1 },
            ]
        );
    }

    #[test]
    fn test_piano_roll_rgb_layout() {
        let (width, height, rgb) = piano_roll_rgb(&sample()).unwrap();
        assert_eq!((width, height), (8, 3));
        assert_eq!(rgb.len(), 8 * 3 * 3);
        let pixel = |row: usize, col: usize| {
            let i = (row * width + col) * 3;
            [rgb[i], rgb[i + 1], rgb[i + 2]]
        };
        assert_eq!(pixel(1, 0), [255, 0, 0]);
        assert_eq!(pixel(1, 1), [0, 204, 0]);
        // clipped above 1
        assert_eq!(pixel(0, 5), [255, 0, 0]);
        assert_eq!(pixel(2, 4), [0, 255, 0]);
        assert_eq!(pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_file_exporter_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = FileExporter::new(dir.path().join("exp")).unwrap();
        let x = sample();
        ExportSink::<TB>::export_image(&mut exporter, &x, "x0").unwrap();
        ExportSink::<TB>::export_note_sequence(&mut exporter, &x, "x0").unwrap();

        let img = image::open(exporter.image_path("x0")).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (8, 3));
        assert_eq!(img.get_pixel(0, 1).0, [255, 0, 0]);

        let json = fs::read_to_string(exporter.notes_path("x0")).unwrap();
        let notes: Vec<Note> = serde_json::from_str(&json).unwrap();
        assert_eq!(notes.len(), 4);
    }

    #[test]
    fn test_single_channel_has_no_sustain() {
        let x = Tensor::<TB, 4>::ones([1, 1, 3, 2], &Default::default());
        let notes = extract_notes(&x).unwrap();
        assert_eq!(notes.len(), 6);
        assert!(notes.iter().all(|n| n.duration == 1));
    }
}
