use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::{GzDecoder, ZlibDecoder};

use super::{CompressionError, RegionError, FRAME_HEADER_BYTES, SECTOR_BYTES};

/// On-disk compression scheme of a chunk frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// GZip, written by long-gone versions of the format. Decode only.
    GZip = 1,
    /// ZLib (deflate). The only scheme written today.
    ZLib = 2,
}

impl Compression {
    pub fn from_byte(byte: u8) -> Result<Self, CompressionError> {
        match byte {
            1 => Ok(Self::GZip),
            2 => Ok(Self::ZLib),
            unknown => Err(CompressionError::UnknownVersion(unknown)),
        }
    }
}

/// Streaming decoder over one frame's compressed payload.
pub enum FrameReader<R: Read> {
    GZip(GzDecoder<R>),
    ZLib(ZlibDecoder<R>),
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::GZip(gzip) => gzip.read(buf),
            Self::ZLib(zlib) => zlib.read(buf),
        }
    }
}

impl<R: Read> FrameReader<R> {
    /// Drains the stream, mapping decoder failures to the matching
    /// compression error.
    pub fn into_payload(mut self) -> Result<Vec<u8>, CompressionError> {
        let mut payload = Vec::new();
        match &mut self {
            Self::GZip(gzip) => gzip
                .read_to_end(&mut payload)
                .map_err(CompressionError::GZipError)?,
            Self::ZLib(zlib) => zlib
                .read_to_end(&mut payload)
                .map_err(CompressionError::ZlibError)?,
        };
        Ok(payload)
    }
}

/// Sectors a frame with `compressed_len` payload bytes spans.
pub fn sectors_needed(compressed_len: usize) -> u32 {
    (compressed_len + FRAME_HEADER_BYTES).div_ceil(SECTOR_BYTES) as u32
}

/// Writes a frame at `start_sector`, zero padded out to the sector
/// boundary so the run never leaks stale bytes.
///
/// | 0 1 2 3 |    4    |   5..   |
/// | length  | version | payload |
pub fn write_frame(file: &mut File, start_sector: u32, compressed: &[u8]) -> io::Result<()> {
    let padded_len = sectors_needed(compressed.len()) as usize * SECTOR_BYTES;

    let mut frame = BytesMut::with_capacity(padded_len);
    frame.put_u32(compressed.len() as u32 + 1);
    frame.put_u8(Compression::ZLib as u8);
    frame.put_slice(compressed);
    frame.resize(padded_len, 0);

    file.seek(SeekFrom::Start(start_sector as u64 * SECTOR_BYTES as u64))?;
    file.write_all(&frame)
}

/// Reads the frame stored in the given sector run and returns a
/// streaming decoder over its payload.
///
/// A length field that does not fit the run's allocation is corrupt
/// framing; an unrecognised version byte is an unknown-version failure.
pub fn read_frame(
    file: &mut File,
    start_sector: u32,
    sector_count: u32,
) -> Result<FrameReader<Cursor<Bytes>>, RegionError> {
    let max = sector_count as usize * SECTOR_BYTES;

    file.seek(SeekFrom::Start(start_sector as u64 * SECTOR_BYTES as u64))?;
    let mut raw = vec![0u8; max];
    file.read_exact(&mut raw)?;
    let mut raw = Bytes::from(raw);

    let length = raw.get_u32();
    if length == 0 || length as usize + 4 > max {
        return Err(RegionError::CorruptFrame {
            length,
            max: max as u32,
        });
    }

    let version = raw.get_u8();
    // length counts the version byte, the payload is the rest
    let payload = Cursor::new(raw.slice(..length as usize - 1));

    match Compression::from_byte(version)? {
        Compression::GZip => Ok(FrameReader::GZip(GzDecoder::new(payload))),
        Compression::ZLib => Ok(FrameReader::ZLib(ZlibDecoder::new(payload))),
    }
}
