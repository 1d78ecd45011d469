use thiserror::Error;

pub mod allocator;
pub mod file;
pub mod frame;
pub mod header;

pub use file::{ChunkWriter, RegionFile};
pub use frame::{Compression, FrameReader};

/// The side size of a region in chunks (one region is 32x32 chunks)
pub const REGION_SIZE: usize = 32;

/// The number of bits that identify two chunks in the same region
pub const SUBREGION_BITS: u32 = (REGION_SIZE as u32).trailing_zeros();

/// The number of chunks in a region
pub const CHUNK_COUNT: usize = REGION_SIZE * REGION_SIZE;

/// The number of bytes in a sector (4 KiB)
pub const SECTOR_BYTES: usize = 4096;

/// Bytes in front of a frame's payload: u32 length + u8 compression version
pub const FRAME_HEADER_BYTES: usize = 5;

/// A frame spans at most this many sectors; the run length is stored in
/// the low byte of its offset entry.
pub const MAX_FRAME_SECTORS: u32 = 255;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Chunk out of bounds: ({x}, {z})")]
    InvalidCoordinate { x: i32, z: i32 },
    #[error("Region file is already closed")]
    UseAfterClose,
    #[error("Invalid sector run: {start}+{count} > {total}")]
    CorruptRegion { start: u32, count: u32, total: u32 },
    #[error("Invalid frame length: {length} does not fit {max} allocated bytes")]
    CorruptFrame { length: u32, max: u32 },
    #[error("Chunk needs {sectors} sectors, frames are capped at {MAX_FRAME_SECTORS}")]
    FrameTooLarge { sectors: u32 },
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Compression scheme not recognised: {0}")]
    UnknownVersion(u8),
    #[error("Error while working with zlib compression: {0}")]
    ZlibError(std::io::Error),
    #[error("Error while working with Gzip compression: {0}")]
    GZipError(std::io::Error),
}

/// A header offset entry whose sector run does not fit in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderDefect {
    /// Table index of the entry, `x + z * 32`.
    pub index: usize,
    pub start_sector: u32,
    pub sector_count: u32,
    /// Sectors the file actually had when the entry was parsed.
    pub total_sectors: u32,
}

/// Sink for defects observed while parsing a region header.
///
/// The engine reports and keeps going; the defective chunk is treated as
/// absent. Callers that have no better channel can pass [`LogDiagnostics`].
pub trait RegionDiagnostics {
    fn corrupt_offset(&mut self, defect: HeaderDefect);
}

/// Forwards header defects to the `log` crate.
#[derive(Default)]
pub struct LogDiagnostics;

impl RegionDiagnostics for LogDiagnostics {
    fn corrupt_offset(&mut self, defect: HeaderDefect) {
        log::warn!(
            "Ignoring offset entry {}: sectors {}..{} do not fit in a {} sector file",
            defect.index,
            defect.start_sector,
            defect.start_sector + defect.sector_count,
            defect.total_sectors
        );
    }
}

/// Maps local chunk coordinates to their header table index.
///
/// Fails before any I/O when either coordinate falls outside the region.
pub(crate) fn chunk_index(x: i32, z: i32) -> Result<usize, RegionError> {
    if !(0..REGION_SIZE as i32).contains(&x) || !(0..REGION_SIZE as i32).contains(&z) {
        return Err(RegionError::InvalidCoordinate { x, z });
    }
    Ok((x + (z << SUBREGION_BITS)) as usize)
}

/// The region a chunk belongs to.
pub const fn region_coords(chunk_x: i32, chunk_z: i32) -> (i32, i32) {
    (chunk_x >> SUBREGION_BITS, chunk_z >> SUBREGION_BITS)
}

/// Conventional file name for a region; directory layout stays with the caller.
pub fn region_file_name(region_x: i32, region_z: i32) -> String {
    format!("r.{}.{}.mca", region_x, region_z)
}
