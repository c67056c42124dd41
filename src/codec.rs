//! Trigger/response frame protocol for the luxmeter head.
//!
//! The device is request/response driven: the host writes one fixed trigger
//! command per sampling tick and the device answers with a single frame
//! carrying one fixed-width numeric field per sensor, delimited by STX/ETX
//! markers. Bytes arrive in arbitrary chunk sizes, so [`FrameAssembler`]
//! buffers partial input across reads until a whole frame is available.

use std::time::Duration;

use log::debug;

use crate::errors::DecodeError;

// ============================================================================
// Constants
// ============================================================================

/// Frame start marker.
pub const STX: u8 = 0x02;

/// Frame end marker.
pub const ETX: u8 = 0x03;

/// Measurement trigger command: requests one sampling cycle from all
/// connected sensor heads. Fixed, no parameters.
pub const TRIGGER: &[u8] = b"00541   \r\n";

// ============================================================================
// Data types
// ============================================================================

/// One decoded frame: a value per sensor plus the capture timestamp
/// (relative to the start of the sampling run). Consumed immediately into
/// the buffer store and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub values: Vec<f64>,
    pub timestamp: Duration,
}

/// Endianness of the numeric fields on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Width of one numeric field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// IEEE-754 single precision, 4 bytes.
    F32,
    /// IEEE-754 double precision, 8 bytes.
    F64,
}

impl ValueKind {
    pub fn width(self) -> usize {
        match self {
            ValueKind::F32 => 4,
            ValueKind::F64 => 8,
        }
    }
}

/// Shape of one inbound frame. Field width and byte order are carried here
/// rather than hard-coded so callers (and tests) can target arbitrary
/// sensor counts and encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub sensors: usize,
    pub value_kind: ValueKind,
    pub byte_order: ByteOrder,
}

impl FrameFormat {
    /// Device default: big-endian f32 fields.
    pub fn new(sensors: usize) -> Self {
        Self {
            sensors,
            value_kind: ValueKind::F32,
            byte_order: ByteOrder::Big,
        }
    }

    /// Total frame size in bytes: STX + fields + ETX.
    pub fn frame_size(&self) -> usize {
        2 + self.sensors * self.value_kind.width()
    }

    /// Encode a response-shaped frame carrying `values`. Used by device
    /// simulators and tests; the host itself only ever sends [`TRIGGER`].
    ///
    /// Missing values are padded with zero, extras are ignored.
    pub fn encode_frame(&self, values: &[f64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_size());
        out.push(STX);
        for i in 0..self.sensors {
            let v = values.get(i).copied().unwrap_or(0.0);
            match (self.value_kind, self.byte_order) {
                (ValueKind::F32, ByteOrder::Big) => {
                    out.extend_from_slice(&(v as f32).to_be_bytes())
                }
                (ValueKind::F32, ByteOrder::Little) => {
                    out.extend_from_slice(&(v as f32).to_le_bytes())
                }
                (ValueKind::F64, ByteOrder::Big) => out.extend_from_slice(&v.to_be_bytes()),
                (ValueKind::F64, ByteOrder::Little) => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        out.push(ETX);
        out
    }

    /// Decode one complete frame.
    ///
    /// Fails with [`DecodeError::Truncated`] when fewer bytes than one full
    /// frame were delivered, and [`DecodeError::Malformed`] when a framing
    /// marker does not match. No side effects beyond parsing.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f64>, DecodeError> {
        let size = self.frame_size();
        if bytes.len() < size {
            return Err(DecodeError::Truncated {
                expected: size,
                actual: bytes.len(),
            });
        }
        if bytes[0] != STX {
            return Err(DecodeError::Malformed {
                expected: STX,
                found: bytes[0],
            });
        }
        if bytes[size - 1] != ETX {
            return Err(DecodeError::Malformed {
                expected: ETX,
                found: bytes[size - 1],
            });
        }

        let width = self.value_kind.width();
        let mut values = Vec::with_capacity(self.sensors);
        for field in bytes[1..size - 1].chunks_exact(width) {
            let v = match (self.value_kind, self.byte_order) {
                (ValueKind::F32, ByteOrder::Big) => {
                    f32::from_be_bytes([field[0], field[1], field[2], field[3]]) as f64
                }
                (ValueKind::F32, ByteOrder::Little) => {
                    f32::from_le_bytes([field[0], field[1], field[2], field[3]]) as f64
                }
                (ValueKind::F64, ByteOrder::Big) => f64::from_be_bytes([
                    field[0], field[1], field[2], field[3], field[4], field[5], field[6], field[7],
                ]),
                (ValueKind::F64, ByteOrder::Little) => f64::from_le_bytes([
                    field[0], field[1], field[2], field[3], field[4], field[5], field[6], field[7],
                ]),
            };
            values.push(v);
        }
        Ok(values)
    }
}

// ============================================================================
// Frame assembly
// ============================================================================

/// Accumulates inbound bytes until a full frame can be decoded.
///
/// The transport delivers bytes in arbitrary chunk sizes; the assembler
/// resynchronizes on the STX marker, discarding any garbage in between.
/// The owning tick clears it when its deadline passes so partial state
/// never carries over more than one interval.
#[derive(Debug)]
pub struct FrameAssembler {
    format: FrameFormat,
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buf: Vec::with_capacity(format.frame_size() * 2),
        }
    }

    /// Append a chunk of raw bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Try to produce the next complete frame.
    ///
    /// `Ok(None)` means more bytes are needed. A decode failure consumes
    /// the offending frame-sized span so the next call resynchronizes.
    pub fn next_frame(&mut self) -> Result<Option<Vec<f64>>, DecodeError> {
        match self.buf.iter().position(|&b| b == STX) {
            Some(pos) if pos > 0 => {
                debug!("discarding {pos} bytes before frame start");
                self.buf.drain(..pos);
            }
            Some(_) => {}
            None => {
                if !self.buf.is_empty() {
                    debug!("discarding {} bytes with no frame start", self.buf.len());
                    self.buf.clear();
                }
                return Ok(None);
            }
        }

        let size = self.format.frame_size();
        if self.buf.len() < size {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..size).collect();
        self.format.decode(&frame).map(Some)
    }

    /// Drop any partial state (used when a tick is abandoned).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_sensor() {
        let format = FrameFormat::new(1);
        let bytes = format.encode_frame(&[512.25]);
        assert_eq!(bytes.len(), format.frame_size());
        let values = format.decode(&bytes).unwrap();
        assert_eq!(values, vec![512.25]);
    }

    #[test]
    fn round_trip_eight_sensors() {
        let format = FrameFormat::new(8);
        let input: Vec<f64> = (0..8).map(|i| 100.0 + i as f64 * 0.5).collect();
        let values = format.decode(&format.encode_frame(&input)).unwrap();
        assert_eq!(values, input);
    }

    #[test]
    fn round_trip_little_endian_f64() {
        let format = FrameFormat {
            sensors: 3,
            value_kind: ValueKind::F64,
            byte_order: ByteOrder::Little,
        };
        let input = vec![0.1, -273.15, 1e6];
        let values = format.decode(&format.encode_frame(&input)).unwrap();
        assert_eq!(values, input);
    }

    #[test]
    fn truncated_input_is_reported_not_fatal() {
        let format = FrameFormat::new(2);
        let bytes = format.encode_frame(&[1.0, 2.0]);
        let err = format.decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                expected: format.frame_size(),
                actual: format.frame_size() - 3,
            }
        );
    }

    #[test]
    fn bad_markers_are_malformed() {
        let format = FrameFormat::new(1);
        let mut bytes = format.encode_frame(&[7.0]);
        bytes[0] = 0xFF;
        assert!(matches!(
            format.decode(&bytes),
            Err(DecodeError::Malformed { expected: STX, .. })
        ));

        let mut bytes = format.encode_frame(&[7.0]);
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert!(matches!(
            format.decode(&bytes),
            Err(DecodeError::Malformed { expected: ETX, .. })
        ));
    }

    #[test]
    fn assembler_joins_arbitrary_chunks() {
        let format = FrameFormat::new(4);
        let frame = format.encode_frame(&[1.0, 2.0, 3.0, 4.0]);
        let mut assembler = FrameAssembler::new(format);

        for chunk in frame.chunks(3) {
            assembler.extend(chunk);
        }
        let values = assembler.next_frame().unwrap().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn assembler_resynchronizes_after_garbage() {
        let format = FrameFormat::new(1);
        let mut assembler = FrameAssembler::new(format);

        assembler.extend(&[0xDE, 0xAD]);
        assembler.extend(&format.encode_frame(&[42.0]));
        let values = assembler.next_frame().unwrap().unwrap();
        assert_eq!(values, vec![42.0]);
    }

    #[test]
    fn assembler_waits_for_full_frame() {
        let format = FrameFormat::new(2);
        let frame = format.encode_frame(&[5.0, 6.0]);
        let mut assembler = FrameAssembler::new(format);

        assembler.extend(&frame[..4]);
        assert_eq!(assembler.next_frame().unwrap(), None);
        assembler.extend(&frame[4..]);
        assert_eq!(assembler.next_frame().unwrap(), Some(vec![5.0, 6.0]));
    }

    #[test]
    fn clear_drops_partial_state() {
        let format = FrameFormat::new(2);
        let frame = format.encode_frame(&[5.0, 6.0]);
        let mut assembler = FrameAssembler::new(format);

        assembler.extend(&frame[..4]);
        assembler.clear();
        assert_eq!(assembler.pending(), 0);
        assert_eq!(assembler.next_frame().unwrap(), None);
    }
}
