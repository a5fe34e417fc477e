//! Wire framing for the component messaging channel.
//!
//! Each frame is `[component id][envelope]`; the envelope is a one-byte
//! type tag plus an opaque body. Only the `PAYLOAD` tag has scheduler
//! semantics; every other tag passes through untouched.
//!
//! Layout (big-endian):
//!
//! ```text
//! u32 frame_len | u16 id_len | id bytes (utf-8) | u8 tag | body bytes
//! ```
//!
//! `frame_len` counts everything after itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame. Anything larger is a protocol error,
/// not a legitimate message.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const PAYLOAD_TAG: u8 = 1;

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Application payload, the only tag the scheduler interprets.
    Payload,
    /// Any other tag; forwarded verbatim.
    Other(u8),
}

impl EnvelopeKind {
    fn to_wire(self) -> u8 {
        match self {
            EnvelopeKind::Payload => PAYLOAD_TAG,
            EnvelopeKind::Other(tag) => tag,
        }
    }

    fn from_wire(tag: u8) -> Self {
        if tag == PAYLOAD_TAG {
            EnvelopeKind::Payload
        } else {
            EnvelopeKind::Other(tag)
        }
    }
}

/// Type tag plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub body: Bytes,
}

impl Envelope {
    pub fn payload(body: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::Payload,
            body: body.into(),
        }
    }

    pub fn tagged(tag: u8, body: impl Into<Bytes>) -> Self {
        Self {
            kind: EnvelopeKind::from_wire(tag),
            body: body.into(),
        }
    }
}

/// One decoded frame: who it is for (or from) and what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterFrame {
    pub component_id: String,
    pub envelope: Envelope,
}

impl RouterFrame {
    pub fn new(component_id: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            component_id: component_id.into(),
            envelope,
        }
    }

    /// Bare identification frame: just the id, empty payload.
    pub fn identify(component_id: impl Into<String>) -> Self {
        Self::new(component_id, Envelope::payload(Bytes::new()))
    }
}

/// Codec for [`RouterFrame`]s over a byte stream.
#[derive(Debug, Default)]
pub struct RouterCodec;

impl Decoder for RouterCodec {
    type Item = RouterFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RouterFrame>, io::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit", frame_len),
            ));
        }
        if src.len() < 4 + frame_len {
            src.reserve(4 + frame_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(frame_len);

        if frame.len() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame too short for id length",
            ));
        }
        let id_len = frame.get_u16() as usize;
        if frame.len() < id_len + 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame too short for id and tag",
            ));
        }
        let id_bytes = frame.split_to(id_len);
        let component_id = std::str::from_utf8(&id_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .to_string();
        let tag = frame.get_u8();

        Ok(Some(RouterFrame {
            component_id,
            envelope: Envelope {
                kind: EnvelopeKind::from_wire(tag),
                body: frame.freeze(),
            },
        }))
    }
}

impl Encoder<RouterFrame> for RouterCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: RouterFrame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let id = frame.component_id.as_bytes();
        if id.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "component id too long",
            ));
        }
        let frame_len = 2 + id.len() + 1 + frame.envelope.body.len();
        if frame_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds size limit",
            ));
        }

        dst.reserve(4 + frame_len);
        dst.put_u32(frame_len as u32);
        dst.put_u16(id.len() as u16);
        dst.put_slice(id);
        dst.put_u8(frame.envelope.kind.to_wire());
        dst.put_slice(&frame.envelope.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: RouterFrame) -> RouterFrame {
        let mut codec = RouterCodec;
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn payload_frame_round_trips() {
        let frame = RouterFrame::new("comp.abc", Envelope::payload(&b"hello"[..]));
        let decoded = round_trip(frame.clone());
        assert_eq!(decoded, frame);
        assert_eq!(decoded.envelope.kind, EnvelopeKind::Payload);
    }

    #[test]
    fn unknown_tags_pass_through() {
        let frame = RouterFrame::new("comp.abc", Envelope::tagged(7, &b"opaque"[..]));
        let decoded = round_trip(frame);
        assert_eq!(decoded.envelope.kind, EnvelopeKind::Other(7));
        assert_eq!(&decoded.envelope.body[..], b"opaque");
    }

    #[test]
    fn identify_frame_has_empty_body() {
        let decoded = round_trip(RouterFrame::identify("comp.abc"));
        assert_eq!(decoded.component_id, "comp.abc");
        assert!(decoded.envelope.body.is_empty());
    }

    #[test]
    fn decoder_waits_for_a_complete_frame() {
        let mut codec = RouterCodec;
        let mut full = BytesMut::new();
        codec
            .encode(
                RouterFrame::new("comp.x", Envelope::payload(&b"split"[..])),
                &mut full,
            )
            .unwrap();

        let mut partial = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[5..]);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.component_id, "comp.x");
    }

    #[test]
    fn two_frames_in_one_buffer_decode_in_order() {
        let mut codec = RouterCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(RouterFrame::new("a", Envelope::payload(&b"1"[..])), &mut buf)
            .unwrap();
        codec
            .encode(RouterFrame::new("b", Envelope::payload(&b"2"[..])), &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().component_id, "a");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().component_id, "b");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        buf.put_slice(&[0u8; 16]);
        assert!(RouterCodec.decode(&mut buf).is_err());
    }
}
