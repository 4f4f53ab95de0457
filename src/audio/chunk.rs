use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// About two seconds of audio in the default format (32000 bytes per second).
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// How input files are cut into chunks
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Bytes per chunk (the last chunk of each file may be shorter)
    pub chunk_size: usize,
    /// Skip this many chunks from the start of the input
    pub start_with_chunk: usize,
    /// Stop after this many chunks
    pub max_chunks_count: Option<usize>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            start_with_chunk: 0,
            max_chunks_count: None,
        }
    }
}

impl ChunkOptions {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Default::default()
        }
    }

    /// Whether the chunk at input position `index` is past the requested range.
    fn is_past_end(&self, index: usize) -> bool {
        match self.max_chunks_count {
            Some(max) => index >= self.start_with_chunk + max,
            None => false,
        }
    }
}

/// Read the files in order as one stream of fixed-size chunks.
///
/// Chunk numbering runs across files, so `start_with_chunk` and
/// `max_chunks_count` address the concatenated input.
pub fn read_chunks_from_files<I>(paths: I, options: ChunkOptions) -> impl Stream<Item = Result<Bytes>>
where
    I: IntoIterator,
    I::Item: Into<PathBuf>,
{
    let cursor = ChunkCursor {
        paths: paths.into_iter().map(Into::into).collect::<Vec<_>>().into_iter(),
        current: None,
        options,
        index: 0,
    };

    stream::try_unfold(cursor, |mut cursor| async move {
        let chunk = cursor.next_chunk().await?;
        Ok::<_, anyhow::Error>(chunk.map(|chunk| (chunk, cursor)))
    })
}

struct ChunkCursor {
    paths: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, File)>,
    options: ChunkOptions,
    index: usize,
}

impl ChunkCursor {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.options.chunk_size == 0 {
            bail!("Chunk size must be positive");
        }

        loop {
            if self.options.is_past_end(self.index) {
                return Ok(None);
            }
            let Some(chunk) = self.read_raw().await? else {
                return Ok(None);
            };
            let index = self.index;
            self.index += 1;
            if index >= self.options.start_with_chunk {
                return Ok(Some(chunk));
            }
        }
    }

    /// Next chunk of the concatenated input, opening files as needed.
    async fn read_raw(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.paths.next() else {
                    return Ok(None);
                };
                let file = File::open(&path)
                    .await
                    .with_context(|| format!("Failed to open audio file: {:?}", path))?;
                info!("Reading {}", path.display());
                self.current = Some((path, file));
            }
            let Some((path, file)) = self.current.as_mut() else {
                continue;
            };

            let mut buf = vec![0u8; self.options.chunk_size];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file
                    .read(&mut buf[filled..])
                    .await
                    .with_context(|| format!("Failed to read audio file: {:?}", path))?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            if filled == 0 {
                debug!("Finished {}", path.display());
                self.current = None;
                continue;
            }

            buf.truncate(filled);
            return Ok(Some(Bytes::from(buf)));
        }
    }
}
