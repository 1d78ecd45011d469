use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use bytes::{Buf, Bytes};

use super::{
    chunk_index, HeaderDefect, RegionDiagnostics, RegionError, CHUNK_COUNT, SECTOR_BYTES,
};

/// Packs a sector run into the on-disk `(start << 8) | count` entry form.
pub const fn pack_offset(start: u32, count: u32) -> u32 {
    (start << 8) | count
}

/// Splits an offset entry into `(start_sector, sector_count)`.
pub const fn unpack_offset(entry: u32) -> (u32, u32) {
    (entry >> 8, entry & 0xFF)
}

/// In-memory mirror of the two fixed header sectors.
///
/// | byte range    | content                                   |
/// | ------------- | ----------------------------------------- |
/// | [0, 4096)     | 1024 big-endian u32 offset entries        |
/// | [4096, 8192)  | 1024 big-endian u32 epoch-second stamps   |
///
/// Both tables are indexed by `x + z * 32`. Setters persist their entry
/// immediately; there is no batching.
pub struct RegionHeader {
    offsets: Box<[u32; CHUNK_COUNT]>,
    timestamps: Box<[u32; CHUNK_COUNT]>,
}

impl RegionHeader {
    /// Parses both tables from the start of an already padded file.
    ///
    /// An offset entry whose sector run reaches past `sector_count` is
    /// handed to `diagnostics` and dropped from the in-memory table, so
    /// the chunk reads as absent and its sectors stay unclaimed. The
    /// entry on disk is left exactly as it was.
    pub fn read(
        file: &mut File,
        sector_count: usize,
        diagnostics: &mut dyn RegionDiagnostics,
    ) -> io::Result<Self> {
        let mut raw = vec![0u8; 2 * SECTOR_BYTES];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw)?;
        let mut raw = Bytes::from(raw);

        let mut offsets = Box::new([0u32; CHUNK_COUNT]);
        let mut timestamps = Box::new([0u32; CHUNK_COUNT]);

        for (index, slot) in offsets.iter_mut().enumerate() {
            let entry = raw.get_u32();
            if entry == 0 {
                continue;
            }

            let (start_sector, count) = unpack_offset(entry);
            if (start_sector + count) as usize <= sector_count {
                *slot = entry;
            } else {
                diagnostics.corrupt_offset(HeaderDefect {
                    index,
                    start_sector,
                    sector_count: count,
                    total_sectors: sector_count as u32,
                });
            }
        }

        for slot in timestamps.iter_mut() {
            *slot = raw.get_u32();
        }

        Ok(Self {
            offsets,
            timestamps,
        })
    }

    /// Sector runs the header currently points at, for seeding the
    /// allocator at open time.
    pub fn used_runs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.offsets
            .iter()
            .filter(|entry| **entry != 0)
            .map(|entry| unpack_offset(*entry))
    }

    pub fn offset(&self, x: i32, z: i32) -> Result<u32, RegionError> {
        Ok(self.offsets[chunk_index(x, z)?])
    }

    pub fn set_offset(
        &mut self,
        file: &mut File,
        x: i32,
        z: i32,
        entry: u32,
    ) -> Result<(), RegionError> {
        let index = chunk_index(x, z)?;
        self.offsets[index] = entry;
        file.seek(SeekFrom::Start((index * 4) as u64))?;
        file.write_all(&entry.to_be_bytes())?;
        Ok(())
    }

    pub fn timestamp(&self, x: i32, z: i32) -> Result<u32, RegionError> {
        Ok(self.timestamps[chunk_index(x, z)?])
    }

    pub fn set_timestamp(
        &mut self,
        file: &mut File,
        x: i32,
        z: i32,
        epoch_seconds: u32,
    ) -> Result<(), RegionError> {
        let index = chunk_index(x, z)?;
        self.timestamps[index] = epoch_seconds;
        file.seek(SeekFrom::Start((SECTOR_BYTES + index * 4) as u64))?;
        file.write_all(&epoch_seconds.to_be_bytes())?;
        Ok(())
    }
}
