// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! This module defines basic framing and all protocol message kinds

use bytes::{Buf, BufMut, BytesMut};

use tether_logging::macros::*;

use crate::error::Error;

/// Identifier of a logical thread; 0 means "no thread" / "any handler".
pub type ThreadId = i64;

/// Discriminates every message that can cross the wire. Kinds at
/// [`Kind::OPERATOR_BASE`] and above are operator requests; their offset
/// from the base is the operator's bit in a proxy descriptor's
/// operator mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Evaluate = 0x00,
    Response = 0x01,
    Exception = 0x02,
    GetAttr = 0x03,
    SetAttr = 0x04,
    GetStr = 0x05,
    GetRepr = 0x06,
    Delete = 0x07,

    OpCall = 0x10,
    OpLen = 0x11,
    OpGetItem = 0x12,
    OpSetItem = 0x13,
    OpDelItem = 0x14,
    OpContains = 0x15,
    OpIter = 0x16,
    OpNext = 0x17,
    OpBool = 0x18,
    OpAdd = 0x19,
    OpSub = 0x1a,
    OpMul = 0x1b,
    OpDiv = 0x1c,
    OpFloorDiv = 0x1d,
    OpMod = 0x1e,
    OpNeg = 0x1f,
    OpEq = 0x20,
    OpNe = 0x21,
    OpLt = 0x22,
    OpLe = 0x23,
    OpGt = 0x24,
    OpGe = 0x25,
}

impl Kind {
    pub const OPERATOR_BASE: u8 = 0x10;

    pub fn from_u8(code: u8) -> Option<Kind> {
        use Kind::*;
        Some(match code {
            0x00 => Evaluate,
            0x01 => Response,
            0x02 => Exception,
            0x03 => GetAttr,
            0x04 => SetAttr,
            0x05 => GetStr,
            0x06 => GetRepr,
            0x07 => Delete,
            0x10 => OpCall,
            0x11 => OpLen,
            0x12 => OpGetItem,
            0x13 => OpSetItem,
            0x14 => OpDelItem,
            0x15 => OpContains,
            0x16 => OpIter,
            0x17 => OpNext,
            0x18 => OpBool,
            0x19 => OpAdd,
            0x1a => OpSub,
            0x1b => OpMul,
            0x1c => OpDiv,
            0x1d => OpFloorDiv,
            0x1e => OpMod,
            0x1f => OpNeg,
            0x20 => OpEq,
            0x21 => OpNe,
            0x22 => OpLt,
            0x23 => OpLe,
            0x24 => OpGt,
            0x25 => OpGe,
            _ => return None,
        })
    }

    /// Kinds that may arrive in response to a request.
    pub fn is_response(self) -> bool {
        matches!(self, Kind::Response | Kind::Exception)
    }

    pub fn is_operator(self) -> bool {
        self as u8 >= Self::OPERATOR_BASE
    }

    /// Bit of this operator in a descriptor's operator mask.
    ///
    /// # Panics
    ///
    /// Panics if the kind is not an operator.
    pub fn operator_bit(self) -> u64 {
        assert!(self.is_operator(), "BUG: {:?} is not an operator", self);
        1u64 << (self as u8 - Self::OPERATOR_BASE)
    }

    /// Name of the operator as seen by the interpreter surface.
    pub fn operator_name(self) -> &'static str {
        use Kind::*;
        match self {
            OpCall => "call",
            OpLen => "len",
            OpGetItem => "getitem",
            OpSetItem => "setitem",
            OpDelItem => "delitem",
            OpContains => "contains",
            OpIter => "iter",
            OpNext => "next",
            OpBool => "bool",
            OpAdd => "+",
            OpSub => "-",
            OpMul => "*",
            OpDiv => "/",
            OpFloorDiv => "//",
            OpMod => "%",
            OpNeg => "neg",
            OpEq => "==",
            OpNe => "!=",
            OpLt => "<",
            OpLe => "<=",
            OpGt => ">",
            OpGe => ">=",
            _ => "?",
        }
    }
}

/// Header of each protocol frame
#[derive(Debug, PartialEq, Clone)]
pub struct Header {
    /// Message kind discriminator
    pub kind: Kind,
    /// Logical thread of the sender that originated this message
    pub source: ThreadId,
    /// Logical thread of the receiver this message is addressed to;
    /// zero means "new request for any handler"
    pub target: ThreadId,
    /// Length of the payload, not including this header
    pub len: u32,
}

impl Header {
    pub const SIZE: usize = 21;
    pub const LEN_OFFSET: usize = 17;

    /// Serializes the header into the specified `dst` buffer
    pub fn serialize(&self, dst: &mut BytesMut) {
        dst.put_u8(self.kind as u8);
        dst.put_i64(self.source);
        dst.put_i64(self.target);
        dst.put_u32(self.len);
    }

    /// Deserializes a `Header` from `src`; the caller must have checked
    /// that at least [`Header::SIZE`] bytes are available
    pub fn deserialize(src: &mut BytesMut) -> Result<Self, Error> {
        let code = src.get_u8();
        let kind = Kind::from_u8(code)
            .ok_or_else(|| Error::protocol(format!("unknown message kind 0x{:02x}", code)))?;
        let source = src.get_i64();
        let target = src.get_i64();
        let len = src.get_u32();
        Ok(Self {
            kind,
            source,
            target,
            len,
        })
    }
}

/// Protocol frame: a typed, sourced, targeted message with an opaque
/// payload produced by the value codec.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: Kind,
    pub source: ThreadId,
    pub target: ThreadId,
    pub payload: BytesMut,
}

impl Message {
    pub fn new(kind: Kind, source: ThreadId, target: ThreadId, payload: BytesMut) -> Self {
        Self {
            kind,
            source,
            target,
            payload,
        }
    }
}

/// Frame codec: the blocking counterpart of a length-delimited codec,
/// with the payload length read out of the fixed-size header.
#[derive(Debug, Default)]
pub struct Codec;

impl tether_wire::Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < Header::SIZE {
            src.reserve(Header::SIZE - src.len());
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            src[Header::LEN_OFFSET],
            src[Header::LEN_OFFSET + 1],
            src[Header::LEN_OFFSET + 2],
            src[Header::LEN_OFFSET + 3],
        ]) as usize;
        let total = Header::SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(total);
        let header = Header::deserialize(&mut frame)?;
        trace!("deserialized header: {:?}", header);
        Ok(Some(Message {
            kind: header.kind,
            source: header.source,
            target: header.target,
            payload: frame,
        }))
    }
}

impl tether_wire::Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Error> {
        assert!(
            item.payload.len() <= u32::MAX as usize,
            "BUG: message payload too large: {} bytes",
            item.payload.len()
        );
        let header = Header {
            kind: item.kind,
            source: item.source,
            target: item.target,
            len: item.payload.len() as u32,
        };
        dst.reserve(Header::SIZE + item.payload.len());
        header.serialize(dst);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

/// Helper struct that groups all framing related associated types
/// (Message + Error + Codec) for the `tether_wire::Framing` trait
#[derive(Debug)]
pub struct Framing;

impl tether_wire::Framing for Framing {
    type Tx = Message;
    type Rx = Message;
    type Error = Error;
    type Codec = Codec;
}

#[cfg(test)]
mod test {
    use super::*;
    use tether_wire::{Decoder as _, Encoder as _};

    #[test]
    fn test_header_serialization() {
        let header = Header {
            kind: Kind::Evaluate,
            source: 2,
            target: 3,
            len: 4,
        };
        let mut bytes = BytesMut::new();
        header.serialize(&mut bytes);

        let expected = [
            0x00u8, // kind
            0, 0, 0, 0, 0, 0, 0, 2, // source, big endian
            0, 0, 0, 0, 0, 0, 0, 3, // target, big endian
            0, 0, 0, 4, // payload length, big endian
        ];
        assert_eq!(&bytes[..], &expected[..]);

        let parsed = Header::deserialize(&mut bytes).expect("header failed to parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_negative_thread_ids_roundtrip() {
        let header = Header {
            kind: Kind::Response,
            source: -1,
            target: i64::MIN,
            len: 0,
        };
        let mut bytes = BytesMut::new();
        header.serialize(&mut bytes);
        let parsed = Header::deserialize(&mut bytes).expect("header failed to parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_codec_roundtrip_and_partial_input() {
        let mut codec = Codec::default();
        let msg = Message::new(Kind::GetAttr, 7, 0, BytesMut::from(&b"\xde\xad\xbe\xef"[..]));

        let mut buffer = BytesMut::new();
        codec
            .encode(msg.clone(), &mut buffer)
            .expect("encode failed");

        // Feed the buffer one byte at a time; no frame until it's complete
        let mut partial = BytesMut::new();
        let mut decoded = None;
        for (i, byte) in buffer.iter().enumerate() {
            partial.extend_from_slice(&[*byte]);
            let got = codec.decode(&mut partial).expect("decode failed");
            if i + 1 < buffer.len() {
                assert!(got.is_none(), "frame produced too early at byte {}", i);
            } else {
                decoded = got;
            }
        }
        assert_eq!(decoded.expect("frame missing"), msg);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_protocol_error() {
        let mut codec = Codec::default();
        let mut buffer = BytesMut::new();
        buffer.put_u8(0xff);
        buffer.put_i64(1);
        buffer.put_i64(0);
        buffer.put_u32(0);
        match codec.decode(&mut buffer) {
            Err(Error::Protocol(_)) => (),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_bits_are_distinct() {
        let ops = [
            Kind::OpCall,
            Kind::OpLen,
            Kind::OpGetItem,
            Kind::OpSetItem,
            Kind::OpDelItem,
            Kind::OpContains,
            Kind::OpIter,
            Kind::OpNext,
            Kind::OpBool,
            Kind::OpAdd,
            Kind::OpSub,
            Kind::OpMul,
            Kind::OpDiv,
            Kind::OpFloorDiv,
            Kind::OpMod,
            Kind::OpNeg,
            Kind::OpEq,
            Kind::OpNe,
            Kind::OpLt,
            Kind::OpLe,
            Kind::OpGt,
            Kind::OpGe,
        ];
        let mut mask = 0u64;
        for op in &ops {
            assert!(op.is_operator());
            assert_eq!(mask & op.operator_bit(), 0, "duplicate bit for {:?}", op);
            mask |= op.operator_bit();
        }
        assert!(!Kind::Response.is_operator());
        assert!(!Kind::Delete.is_operator());
    }
}
