pub mod chunk;
pub mod format;

pub use chunk::{read_chunks_from_files, ChunkOptions, DEFAULT_CHUNK_SIZE};
pub use format::AudioFormat;
