//! HTTP/2 Frame Codec
//!
//! Minimal wire-format parsing for inspection: frame boundaries, the frame
//! types the inspector reports on, and HPACK header-block decompression.
//! This is deliberately not a protocol implementation - no stream state, no
//! flow control, no settings negotiation - frames are parsed, described, and
//! dropped.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Client connection preface every HTTP/2 connection must open with
/// (RFC 9113 section 3.4).
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Fixed frame header size (RFC 9113 section 4.1).
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest frame payload the inspector will buffer. Matches the protocol
/// default for SETTINGS_MAX_FRAME_SIZE; peers that negotiated larger frames
/// terminate inspection with [`FrameError::FrameTooLarge`].
pub const MAX_FRAME_SIZE: usize = 16_384;

/// Frame type codes (RFC 9113 section 6).
pub mod kind {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const SETTINGS: u8 = 0x4;
    pub const PING: u8 = 0x6;
    pub const WINDOW_UPDATE: u8 = 0x8;
}

/// Frame flag bits (RFC 9113 section 6).
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Frame-level parse errors. Framing errors end the direction being
/// inspected; an HPACK failure only degrades logging for that frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds the {MAX_FRAME_SIZE}-byte read limit")]
    FrameTooLarge(usize),

    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("HPACK decompression failed: {0}")]
    Hpack(String),
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> FrameError {
    FrameError::Malformed {
        kind,
        reason: reason.into(),
    }
}

/// One SETTINGS parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

impl Setting {
    /// RFC 9113 section 6.5.2 parameter name, if the identifier is a known one.
    pub fn name(&self) -> Option<&'static str> {
        match self.id {
            0x1 => Some("HEADER_TABLE_SIZE"),
            0x2 => Some("ENABLE_PUSH"),
            0x3 => Some("MAX_CONCURRENT_STREAMS"),
            0x4 => Some("INITIAL_WINDOW_SIZE"),
            0x5 => Some("MAX_FRAME_SIZE"),
            0x6 => Some("MAX_HEADER_LIST_SIZE"),
            _ => None,
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "[{} = {}]", name, self.value),
            None => write!(f, "[UNKNOWN_SETTING_{} = {}]", self.id, self.value),
        }
    }
}

/// A parsed frame. Unknown types land in `Other` so the inspector can observe
/// an open set of frame kinds without failing on new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Settings {
        ack: bool,
        entries: Vec<Setting>,
    },
    Headers {
        stream_id: u32,
        end_stream: bool,
        end_headers: bool,
        fragment: Bytes,
    },
    Data {
        stream_id: u32,
        end_stream: bool,
        payload: Bytes,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Other {
        kind: u8,
        stream_id: u32,
        flags: u8,
        len: usize,
    },
}

impl Frame {
    /// Parse one frame from the front of `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
    /// nothing is consumed in that case.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | (buf[2] as usize);
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(len));
        }
        if buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        let header = buf.split_to(FRAME_HEADER_LEN);
        let kind = header[3];
        let raw_flags = header[4];
        // Reserved high bit of the stream id is masked off.
        let stream_id = ((header[5] as u32 & 0x7f) << 24)
            | ((header[6] as u32) << 16)
            | ((header[7] as u32) << 8)
            | (header[8] as u32);
        let payload = buf.split_to(len).freeze();

        let frame = match kind {
            kind::SETTINGS => Self::parse_settings(raw_flags, payload)?,
            kind::HEADERS => Self::parse_headers(stream_id, raw_flags, payload)?,
            kind::DATA => Self::parse_data(stream_id, raw_flags, payload)?,
            kind::PING => Self::parse_ping(raw_flags, payload)?,
            kind::WINDOW_UPDATE => Self::parse_window_update(stream_id, payload)?,
            other => Frame::Other {
                kind: other,
                stream_id,
                flags: raw_flags,
                len,
            },
        };
        Ok(Some(frame))
    }

    fn parse_settings(raw_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        let ack = raw_flags & flags::ACK != 0;
        if ack && !payload.is_empty() {
            return Err(malformed("SETTINGS", "ACK frame with a payload"));
        }
        if payload.len() % 6 != 0 {
            return Err(malformed(
                "SETTINGS",
                format!("payload of {} bytes is not a multiple of 6", payload.len()),
            ));
        }
        let entries = payload
            .chunks_exact(6)
            .map(|entry| Setting {
                id: u16::from_be_bytes([entry[0], entry[1]]),
                value: u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]),
            })
            .collect();
        Ok(Frame::Settings { ack, entries })
    }

    fn parse_headers(stream_id: u32, raw_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        let mut fragment = payload;
        let mut pad = 0usize;
        if raw_flags & flags::PADDED != 0 {
            if fragment.is_empty() {
                return Err(malformed("HEADERS", "PADDED frame without a pad length"));
            }
            pad = fragment[0] as usize;
            fragment.advance(1);
        }
        if raw_flags & flags::PRIORITY != 0 {
            if fragment.len() < 5 {
                return Err(malformed("HEADERS", "PRIORITY frame shorter than 5 bytes"));
            }
            fragment.advance(5);
        }
        if pad > fragment.len() {
            return Err(malformed("HEADERS", "padding exceeds the payload"));
        }
        fragment.truncate(fragment.len() - pad);
        Ok(Frame::Headers {
            stream_id,
            end_stream: raw_flags & flags::END_STREAM != 0,
            end_headers: raw_flags & flags::END_HEADERS != 0,
            fragment,
        })
    }

    fn parse_data(stream_id: u32, raw_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        let mut payload = payload;
        if raw_flags & flags::PADDED != 0 {
            if payload.is_empty() {
                return Err(malformed("DATA", "PADDED frame without a pad length"));
            }
            let pad = payload[0] as usize;
            payload.advance(1);
            if pad > payload.len() {
                return Err(malformed("DATA", "padding exceeds the payload"));
            }
            payload.truncate(payload.len() - pad);
        }
        Ok(Frame::Data {
            stream_id,
            end_stream: raw_flags & flags::END_STREAM != 0,
            payload,
        })
    }

    fn parse_ping(raw_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() != 8 {
            return Err(malformed(
                "PING",
                format!("payload must be 8 bytes, got {}", payload.len()),
            ));
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&payload);
        Ok(Frame::Ping {
            ack: raw_flags & flags::ACK != 0,
            payload: data,
        })
    }

    fn parse_window_update(stream_id: u32, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() != 4 {
            return Err(malformed(
                "WINDOW_UPDATE",
                format!("payload must be 4 bytes, got {}", payload.len()),
            ));
        }
        let increment =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
        Ok(Frame::WindowUpdate {
            stream_id,
            increment,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Settings { ack: true, .. } => write!(f, "SETTINGS flags=ACK"),
            Frame::Settings { entries, .. } => {
                write!(f, "SETTINGS entries={}", entries.len())
            }
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                fragment,
            } => {
                write!(f, "HEADERS stream={} len={}", stream_id, fragment.len())?;
                if *end_headers {
                    write!(f, " +END_HEADERS")?;
                }
                if *end_stream {
                    write!(f, " +END_STREAM")?;
                }
                Ok(())
            }
            Frame::Data {
                stream_id,
                end_stream,
                payload,
            } => {
                write!(f, "DATA stream={} len={}", stream_id, payload.len())?;
                if *end_stream {
                    write!(f, " +END_STREAM")?;
                }
                Ok(())
            }
            Frame::Ping { ack, .. } => {
                write!(f, "PING")?;
                if *ack {
                    write!(f, " flags=ACK")?;
                }
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => write!(f, "WINDOW_UPDATE stream={} increment={}", stream_id, increment),
            Frame::Other {
                kind,
                stream_id,
                flags,
                len,
            } => write!(
                f,
                "UNKNOWN type={:#04x} stream={} flags={:#04x} len={}",
                kind, stream_id, flags, len
            ),
        }
    }
}

/// Decompress a HEADERS header-block fragment into ordered field/value pairs.
///
/// A fresh decoder is used per fragment, so dynamic-table state is not carried
/// across frames. Good enough for observing self-contained header blocks; a
/// fragment that references earlier dynamic-table entries will fail to decode.
pub fn decode_header_fragment(fragment: &[u8]) -> Result<Vec<(String, String)>, FrameError> {
    let mut decoder = hpack::Decoder::new();
    let fields = decoder
        .decode(fragment)
        .map_err(|e| FrameError::Hpack(format!("{:?}", e)))?;
    Ok(fields
        .into_iter()
        .map(|(name, value)| {
            (
                String::from_utf8_lossy(&name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            )
        })
        .collect())
}
