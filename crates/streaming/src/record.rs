//! Versioned binary record for persisting a packed grid.
//!
//! Layout (little-endian):
//! `BITX` magic, `u16` version, `u16` flags (reserved), `u32` width,
//! `u32` height, `u32` word count, then `count` x (`u32` index, `u16` word).

use std::io::{Read, Write};

use bitmap::{CellGrid, SparseWords};
use foundation::TileSize;

use crate::error::RecordError;

const MAGIC: [u8; 4] = *b"BITX";
const VERSION_V1: u16 = 1;
const VERSION_LATEST: u16 = VERSION_V1;

/// Bytes before the first `(index, word)` pair.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 4 + 4;
const PAIR_LEN: usize = 4 + 2;

pub fn encode_record(grid: &CellGrid) -> Result<Vec<u8>, RecordError> {
    let sparse = grid.to_sparse_words();
    let mut out: Vec<u8> = Vec::with_capacity(HEADER_LEN + sparse.len() * PAIR_LEN);
    encode_record_to_writer(grid.width(), grid.height(), &sparse, &mut out)?;
    Ok(out)
}

pub fn encode_record_to_writer<W: Write>(
    width: u32,
    height: u32,
    sparse: &SparseWords,
    w: &mut W,
) -> Result<(), RecordError> {
    w.write_all(&MAGIC).map_err(map_io_err)?;
    write_u16_le(w, VERSION_LATEST)?;

    // flags (reserved)
    write_u16_le(w, 0)?;

    write_u32_le(w, width)?;
    write_u32_le(w, height)?;
    write_u32_le(w, sparse.len() as u32)?;

    for (&index, &value) in sparse.indices.iter().zip(&sparse.values) {
        write_u32_le(w, index)?;
        write_u16_le(w, value)?;
    }
    Ok(())
}

/// Decode a record for a tile of `expected` size.
///
/// Any header that disagrees with the current format or tile size is an error;
/// callers treat that as a cache miss.
pub fn decode_record(bytes: &[u8], expected: TileSize) -> Result<CellGrid, RecordError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let grid = decode_record_from_reader(&mut cursor, expected)?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(RecordError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(grid)
}

pub fn decode_record_from_reader<R: Read>(
    r: &mut R,
    expected: TileSize,
) -> Result<CellGrid, RecordError> {
    let magic = read_exact_io::<4>(r)?;
    if magic != MAGIC {
        return Err(RecordError::InvalidMagic);
    }

    let version = read_u16_le_io(r)?;
    if version != VERSION_V1 {
        return Err(RecordError::UnsupportedVersion { found: version });
    }

    let _flags = read_u16_le_io(r)?;
    let width = read_u32_le_io(r)?;
    let height = read_u32_le_io(r)?;
    if (width, height) != (expected.width, expected.height) {
        return Err(RecordError::DimensionMismatch {
            width: expected.width,
            height: expected.height,
            found_width: width,
            found_height: height,
        });
    }

    let count = read_u32_le_io(r)? as usize;
    let max = (width as usize / 4) * (height as usize / 4);
    if count > max {
        return Err(RecordError::CountOutOfRange { count, max });
    }

    let mut sparse = SparseWords {
        indices: Vec::with_capacity(count),
        values: Vec::with_capacity(count),
    };
    for _ in 0..count {
        sparse.indices.push(read_u32_le_io(r)?);
        sparse.values.push(read_u16_le_io(r)?);
    }

    Ok(CellGrid::from_sparse_words(width, height, &sparse)?)
}

fn map_io_err(e: std::io::Error) -> RecordError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RecordError::UnexpectedEof
    } else {
        RecordError::Io(e.to_string())
    }
}

fn read_exact_io<const N: usize>(r: &mut impl Read) -> Result<[u8; N], RecordError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(map_io_err)?;
    Ok(buf)
}

fn read_u16_le_io(r: &mut impl Read) -> Result<u16, RecordError> {
    Ok(u16::from_le_bytes(read_exact_io::<2>(r)?))
}

fn read_u32_le_io(r: &mut impl Read) -> Result<u32, RecordError> {
    Ok(u32::from_le_bytes(read_exact_io::<4>(r)?))
}

fn write_u16_le(w: &mut impl Write, v: u16) -> Result<(), RecordError> {
    w.write_all(&v.to_le_bytes()).map_err(map_io_err)
}

fn write_u32_le(w: &mut impl Write, v: u32) -> Result<(), RecordError> {
    w.write_all(&v.to_le_bytes()).map_err(map_io_err)
}
