use serde::{Deserialize, Serialize};

/// Compression settings for newly written chunk frames.
#[derive(Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChunkCompression {
    /// Deflate level, 0-9. Frames on disk stay readable whatever the
    /// level they were written with.
    pub level: u32,
}

impl Default for ChunkCompression {
    fn default() -> Self {
        Self {
            level: flate2::Compression::fast().level(),
        }
    }
}
