//! Version 1 of the compact report format.
//!
//! ```text
//! [u32 head = 1][u32 count = N][record; RECORD_LEN] x N [u32 eof = 0xFFFFFFFF]
//! ```
//!
//! All integers are big-endian. Each record is exactly [`RECORD_LEN`] bytes:
//!
//! | Offset | Width | Field            | Encoding                          |
//! |-------:|------:|------------------|-----------------------------------|
//! | 0      | 4     | pilot number     | `i32`                             |
//! | 4      | 10    | callsign         | ASCII, NUL-padded, truncated      |
//! | 14     | 4     | latitude         | `i32`, degrees x 1e6, rounded     |
//! | 18     | 4     | longitude        | `i32`, degrees x 1e6, rounded     |
//! | 22     | 4     | altitude         | `i32`, feet                       |
//! | 26     | 2     | groundspeed      | `u16`, knots                      |
//! | 28     | 2     | heading          | `u16`, degrees                    |
//! | 30     | 2     | QNH              | `u16`, millibars                  |
//! | 32     | 1     | flags            | bit 0 = on ground                 |
//! | 33     | 6     | aircraft type    | ASCII, NUL-padded, truncated      |
//! | 39     | 4     | origin           | ASCII, NUL-padded, truncated      |
//! | 43     | 4     | destination      | ASCII, NUL-padded, truncated      |
//!
//! Decoding is driven by the declared count and the fixed record width,
//! never by scanning for delimiters.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::CodecError;
use crate::model::Position;

pub const V1_HEAD: u32 = 1;
pub const V1_EOF: u32 = 0xFFFF_FFFF;

pub const CALLSIGN_LEN: usize = 10;
pub const AIRCRAFT_LEN: usize = 6;
pub const AIRPORT_LEN: usize = 4;

/// Width of one encoded position.
pub const RECORD_LEN: usize = 4 + CALLSIGN_LEN + 4 + 4 + 4 + 2 + 2 + 2 + 1 + AIRCRAFT_LEN + 2 * AIRPORT_LEN;

/// Coordinates are stored with six decimal digits.
const COORD_SCALE: f64 = 1_000_000.0;

const FLAG_ON_GROUND: u8 = 0b0000_0001;

/// Write `positions` in input order. No validation beyond the fixed widths:
/// text longer than its slot is truncated.
pub fn encode<W: Write>(positions: &[Position], out: &mut W) -> std::io::Result<()> {
    out.write_u32::<BigEndian>(V1_HEAD)?;
    out.write_u32::<BigEndian>(positions.len() as u32)?;
    for position in positions {
        encode_record(position, out)?;
    }
    out.write_u32::<BigEndian>(V1_EOF)?;
    out.flush()
}

/// Encode into a fresh buffer.
pub fn encode_to_vec(positions: &[Position]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + positions.len() * RECORD_LEN);
    // Writing to a Vec cannot fail.
    let _ = encode(positions, &mut buf);
    buf
}

pub fn decode<R: Read>(input: &mut R) -> Result<Vec<Position>, CodecError> {
    let head = input
        .read_u32::<BigEndian>()
        .map_err(|e| truncated(e, "version tag", 4))?;
    if head != V1_HEAD {
        return Err(CodecError::UnsupportedVersion {
            expected: V1_HEAD,
            found: head,
        });
    }

    let declared = input
        .read_u32::<BigEndian>()
        .map_err(|e| truncated(e, "record count", 4))?;

    let mut positions = Vec::with_capacity((declared as usize).min(65_536));
    let mut record = [0u8; RECORD_LEN];
    for _ in 0..declared {
        input
            .read_exact(&mut record)
            .map_err(|e| truncated(e, "record data", RECORD_LEN))?;
        positions.push(decode_record(&record)?);
    }

    let eof = input
        .read_u32::<BigEndian>()
        .map_err(|e| truncated(e, "EOF marker", 4))?;
    if eof != V1_EOF {
        return Err(CodecError::MissingEof { found: eof });
    }

    if positions.len() != declared as usize {
        return Err(CodecError::CountMismatch {
            declared,
            decoded: positions.len(),
        });
    }

    Ok(positions)
}

pub fn decode_slice(mut bytes: &[u8]) -> Result<Vec<Position>, CodecError> {
    decode(&mut bytes)
}

fn encode_record<W: Write>(position: &Position, out: &mut W) -> std::io::Result<()> {
    out.write_i32::<BigEndian>(position.pilot_number)?;
    write_text(out, &position.callsign, CALLSIGN_LEN)?;
    out.write_i32::<BigEndian>(to_fixed(position.latitude))?;
    out.write_i32::<BigEndian>(to_fixed(position.longitude))?;
    out.write_i32::<BigEndian>(position.altitude)?;
    out.write_u16::<BigEndian>(position.groundspeed)?;
    out.write_u16::<BigEndian>(position.heading)?;
    out.write_u16::<BigEndian>(position.qnh_mb)?;
    out.write_u8(if position.on_ground { FLAG_ON_GROUND } else { 0 })?;
    write_text(out, position.fp_aircraft.as_deref().unwrap_or(""), AIRCRAFT_LEN)?;
    write_text(out, position.fp_origin.as_deref().unwrap_or(""), AIRPORT_LEN)?;
    write_text(out, position.fp_destination.as_deref().unwrap_or(""), AIRPORT_LEN)
}

fn decode_record(record: &[u8; RECORD_LEN]) -> Result<Position, CodecError> {
    let mut cursor = Cursor::new(&record[..]);
    let pilot_number = cursor.read_i32::<BigEndian>()?;
    let callsign = read_text(&mut cursor, CALLSIGN_LEN)?;
    let latitude = from_fixed(cursor.read_i32::<BigEndian>()?);
    let longitude = from_fixed(cursor.read_i32::<BigEndian>()?);
    let altitude = cursor.read_i32::<BigEndian>()?;
    let groundspeed = cursor.read_u16::<BigEndian>()?;
    let heading = cursor.read_u16::<BigEndian>()?;
    let qnh_mb = cursor.read_u16::<BigEndian>()?;
    let flags = cursor.read_u8()?;
    let fp_aircraft = Some(read_text(&mut cursor, AIRCRAFT_LEN)?).filter(|s| !s.is_empty());
    let fp_origin = Some(read_text(&mut cursor, AIRPORT_LEN)?).filter(|s| !s.is_empty());
    let fp_destination = Some(read_text(&mut cursor, AIRPORT_LEN)?).filter(|s| !s.is_empty());

    Ok(Position {
        pilot_number,
        callsign,
        latitude,
        longitude,
        altitude,
        groundspeed,
        heading,
        qnh_mb,
        on_ground: flags & FLAG_ON_GROUND != 0,
        fp_aircraft,
        fp_origin,
        fp_destination,
    })
}

fn to_fixed(degrees: f64) -> i32 {
    (degrees * COORD_SCALE).round() as i32
}

fn from_fixed(value: i32) -> f64 {
    value as f64 / COORD_SCALE
}

/// Fixed-width text slot, NUL-padded. Non-ASCII characters become `?` so
/// every slot byte is one character.
fn write_text<W: Write>(out: &mut W, text: &str, width: usize) -> std::io::Result<()> {
    let mut slot = [0u8; CALLSIGN_LEN];
    let slot = &mut slot[..width];
    for (dst, ch) in slot.iter_mut().zip(text.chars()) {
        *dst = if ch.is_ascii() && ch != '\0' { ch as u8 } else { b'?' };
    }
    out.write_all(slot)
}

fn read_text<R: Read>(input: &mut R, width: usize) -> std::io::Result<String> {
    let mut slot = [0u8; CALLSIGN_LEN];
    let slot = &mut slot[..width];
    input.read_exact(slot)?;
    let end = slot.iter().position(|&b| b == 0).unwrap_or(width);
    Ok(String::from_utf8_lossy(&slot[..end]).into_owned())
}

fn truncated(e: std::io::Error, section: &'static str, needed: usize) -> CodecError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => CodecError::Truncated { section, needed },
        _ => CodecError::Io(e),
    }
}
