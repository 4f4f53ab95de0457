use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::audio::AudioFormat;
use crate::session::{ResultSink, Utterance};

/// Writes every utterance's audio and text next to each other.
///
/// Files are named `<prefix>_<n>.wav` (16-bit PCM) or `<prefix>_<n>.sound`
/// (anything else, raw bytes) plus `<prefix>_<n>.txt`.
pub struct SplitterSink {
    dir: PathBuf,
    prefix: String,
    wav_spec: Option<hound::WavSpec>,
    count: AtomicUsize,
}

impl SplitterSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, format: &AudioFormat) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create split directory {}", dir.display()))?;

        Ok(Self {
            dir,
            prefix: prefix.into(),
            wav_spec: format.wav_spec(),
            count: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Utterances written so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn write_wav(&self, path: &Path, spec: hound::WavSpec, utterance: &Utterance) -> Result<()> {
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        // A chunk boundary may split a sample.
        let audio: Vec<u8> = utterance.audio().flat_map(|b| b.iter().copied()).collect();
        for pair in audio.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .context("Failed to write sample to WAV")?;
        }

        writer.finalize().context("Failed to finalize WAV file")?;
        Ok(())
    }

    fn write_raw(&self, path: &Path, utterance: &Utterance) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create sound file: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for chunk in utterance.audio() {
            writer.write_all(chunk)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ResultSink for SplitterSink {
    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        let stem = format!("{}_{}", self.prefix, n);

        let audio_path = match self.wav_spec {
            Some(spec) => {
                let path = self.dir.join(format!("{}.wav", stem));
                self.write_wav(&path, spec, utterance)?;
                path
            }
            None => {
                let path = self.dir.join(format!("{}.sound", stem));
                self.write_raw(&path, utterance)?;
                path
            }
        };

        let text_path = self.dir.join(format!("{}.txt", stem));
        fs::write(&text_path, &utterance.text)
            .with_context(|| format!("Failed to write {}", text_path.display()))?;

        info!(
            "Got complete utterance, for {} data chunks, saved as {}",
            utterance.chunks.len(),
            audio_path.display()
        );
        Ok(())
    }
}
