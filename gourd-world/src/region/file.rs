use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::mem;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use flate2::write::ZlibEncoder;

use crate::config::ChunkCompression;

use super::allocator::SectorAllocator;
use super::frame::{self, FrameReader};
use super::header::{pack_offset, unpack_offset, RegionHeader};
use super::{
    chunk_index, CompressionError, LogDiagnostics, RegionDiagnostics, RegionError,
    MAX_FRAME_SECTORS, SECTOR_BYTES,
};

/// One region's backing file: a 32x32 grid of chunk slots stored in
/// runs of 4 KiB sectors behind two fixed header sectors.
///
/// The instance has no internal locking. `&mut self` on every mutating
/// operation leaves serialization of writers to the caller; reads of
/// chunks not currently being rewritten only touch the header mirror
/// and already placed sectors.
pub struct RegionFile {
    file: Option<File>,
    header: RegionHeader,
    allocator: SectorAllocator,
    compression: ChunkCompression,
    last_modified: Option<SystemTime>,
    size_delta: u64,
}

impl RegionFile {
    /// Opens (or creates) a region file, logging any header defects.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegionError> {
        Self::open_with(path, ChunkCompression::default(), &mut LogDiagnostics)
    }

    /// Opens a region file with explicit compression settings and a
    /// caller supplied sink for header defects.
    ///
    /// A file shorter than its two header sectors is zero padded up to
    /// exactly 8 KiB; one that is not a whole number of sectors is zero
    /// padded up to the next boundary. Both pads count toward the size
    /// delta, matching growth by writes.
    pub fn open_with(
        path: impl AsRef<Path>,
        compression: ChunkCompression,
        diagnostics: &mut dyn RegionDiagnostics,
    ) -> Result<Self, RegionError> {
        let path = path.as_ref();
        log::trace!("Opening region file {:?}", path);

        // modification time is snapshotted before we touch the file;
        // None means the region is brand new
        let last_modified = fs::metadata(path)
            .ok()
            .and_then(|meta| meta.modified().ok());

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut size_delta = 0;
        let len = file.metadata()?.len();
        let padded = if len < (2 * SECTOR_BYTES) as u64 {
            (2 * SECTOR_BYTES) as u64
        } else {
            len.next_multiple_of(SECTOR_BYTES as u64)
        };
        if padded != len {
            if last_modified.is_some() {
                log::warn!(
                    "Region {:?} was {} bytes, padding to {}",
                    path,
                    len,
                    padded
                );
            }
            file.seek(SeekFrom::End(0))?;
            file.write_all(&vec![0u8; (padded - len) as usize])?;
            size_delta += padded - len;
        }

        let sector_count = (padded / SECTOR_BYTES as u64) as usize;
        let mut allocator = SectorAllocator::from_sector_count(sector_count);
        let header = RegionHeader::read(&mut file, sector_count, diagnostics)?;
        for (start, count) in header.used_runs() {
            allocator.mark_used(start, count);
        }

        Ok(Self {
            file: Some(file),
            header,
            allocator,
            compression,
            last_modified,
            size_delta,
        })
    }

    /// Whether the chunk has data placed in this region.
    pub fn has_chunk(&self, x: i32, z: i32) -> Result<bool, RegionError> {
        let entry = self.header.offset(x, z)?;
        if self.file.is_none() {
            return Err(RegionError::UseAfterClose);
        }
        Ok(entry != 0)
    }

    /// Opens a decoding stream over the chunk's payload, or `None` when
    /// the chunk is absent. Absence is not a failure.
    pub fn open_read(
        &mut self,
        x: i32,
        z: i32,
    ) -> Result<Option<FrameReader<Cursor<Bytes>>>, RegionError> {
        let entry = self.header.offset(x, z)?;
        let total = self.allocator.sector_count() as u32;
        let file = self.file.as_mut().ok_or(RegionError::UseAfterClose)?;

        if entry == 0 {
            return Ok(None);
        }

        let (start, count) = unpack_offset(entry);
        if (start + count) > total {
            return Err(RegionError::CorruptRegion {
                start,
                count,
                total,
            });
        }

        Ok(Some(frame::read_frame(file, start, count)?))
    }

    /// Reads the chunk's whole payload, or `None` when absent.
    pub fn read(&mut self, x: i32, z: i32) -> Result<Option<Vec<u8>>, RegionError> {
        match self.open_read(x, z)? {
            Some(reader) => Ok(Some(reader.into_payload()?)),
            None => Ok(None),
        }
    }

    /// Returns a sink for the chunk's payload. Bytes are deflated as
    /// they arrive; the file is untouched until [`ChunkWriter::commit`].
    pub fn open_write(&mut self, x: i32, z: i32) -> Result<ChunkWriter<'_>, RegionError> {
        chunk_index(x, z)?;
        if self.file.is_none() {
            return Err(RegionError::UseAfterClose);
        }

        let level = flate2::Compression::new(self.compression.level);
        Ok(ChunkWriter {
            region: self,
            x,
            z,
            encoder: ZlibEncoder::new(Vec::new(), level),
        })
    }

    /// Forces written sectors down to durable storage and releases the
    /// handle. Everything but [`Self::last_modified`] and
    /// [`Self::size_delta`] fails afterwards.
    pub fn close(&mut self) -> Result<(), RegionError> {
        let file = self.file.take().ok_or(RegionError::UseAfterClose)?;
        file.sync_all()?;
        Ok(())
    }

    /// The backing file's modification time as observed at open time;
    /// `None` when the file was created by this instance.
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Bytes the file has grown since the last call; reading resets the
    /// counter.
    pub fn size_delta(&mut self) -> u64 {
        mem::take(&mut self.size_delta)
    }

    /// Commit path: places a finished compressed payload, then updates
    /// the header. The offset entry is rewritten only after the data
    /// sectors are fully on file, so an interrupted write leaves the
    /// previous offset (and therefore the previous data) intact.
    fn place(&mut self, x: i32, z: i32, compressed: &[u8]) -> Result<(), RegionError> {
        let needed = frame::sectors_needed(compressed.len());
        if needed > MAX_FRAME_SECTORS {
            return Err(RegionError::FrameTooLarge { sectors: needed });
        }

        let entry = self.header.offset(x, z)?;
        let file = self.file.as_mut().ok_or(RegionError::UseAfterClose)?;
        let (old_start, old_count) = unpack_offset(entry);

        if old_start != 0 && old_count == needed {
            // same geometry: overwrite the existing run, the offset
            // entry already points at it
            frame::write_frame(file, old_start, compressed)?;
        } else {
            if entry != 0 {
                self.allocator.free(old_start, old_count);
            }

            let allocation = self.allocator.allocate(needed);
            log::trace!(
                "Placing chunk ({}, {}) at {}:{} ({} appended)",
                x,
                z,
                allocation.start,
                needed,
                allocation.appended
            );

            // an appended run starts at the old end of file, so writing
            // the padded frame is what grows the file
            frame::write_frame(file, allocation.start, compressed)?;
            self.size_delta += allocation.appended as u64 * SECTOR_BYTES as u64;

            self.header
                .set_offset(file, x, z, pack_offset(allocation.start, needed))?;
        }

        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        self.header.set_timestamp(file, x, z, epoch)?;
        Ok(())
    }
}

/// In-memory accumulator for one chunk's payload, bound to its target
/// coordinate. Exactly one of [`commit`](Self::commit) or
/// [`discard`](Self::discard) ends it; dropping the writer is the same
/// free cancellation as `discard`.
pub struct ChunkWriter<'a> {
    region: &'a mut RegionFile,
    x: i32,
    z: i32,
    encoder: ZlibEncoder<Vec<u8>>,
}

impl Write for ChunkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl ChunkWriter<'_> {
    /// Finishes compression, decides sector geometry and places the
    /// frame, in that order. Data sectors are written before the offset
    /// entry, the timestamp goes last.
    pub fn commit(self) -> Result<(), RegionError> {
        let compressed = self
            .encoder
            .finish()
            .map_err(CompressionError::ZlibError)?;
        self.region.place(self.x, self.z, &compressed)
    }

    /// Cancels the write. Nothing was placed, nothing has to be undone.
    pub fn discard(self) {}
}
