use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Save audio that never made it into a completed utterance.
///
/// Written as `<dir>/<unix seconds>.crash.utterance`.
pub fn save_crash_utterance(dir: &Path, audio: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create recovery directory {}", dir.display()))?;

    let now = chrono::Utc::now();
    let stamp = format!("{}.{:03}", now.timestamp(), now.timestamp_subsec_millis());
    let path = dir.join(format!("{}.crash.utterance", stamp));

    fs::write(&path, audio)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Saving crash utterance as {} ({} bytes)", path.display(), audio.len());
    Ok(path)
}

/// Best-effort variant: failures are only logged.
pub fn try_save_crash_utterance(dir: Option<&Path>, audio: &[u8]) -> Option<PathBuf> {
    let dir = dir?;
    if audio.is_empty() {
        return None;
    }
    match save_crash_utterance(dir, audio) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Could not save unflushed audio: {:#}", e);
            None
        }
    }
}
