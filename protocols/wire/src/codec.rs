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

//! Frame codec traits for blocking streams.
//!
//! Mirrors the shape of an async codec pair: a `Decoder` consumes bytes
//! accumulated in a `BytesMut` and yields complete frames, an `Encoder`
//! appends the serialized form of a frame to an output buffer. Neither
//! trait is aware of the underlying stream.

use bytes::BytesMut;
use std::io;

/// Turns bytes accumulated from a stream into frames.
///
/// `decode` must remove exactly one frame's worth of bytes from `src` when
/// it returns `Some`, and must leave `src` untouched (apart from reserving
/// capacity) when the buffered data doesn't yet contain a complete frame.
pub trait Decoder {
    type Item;
    type Error: From<io::Error>;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error>;
}

/// Turns frames into bytes appended to an output buffer.
pub trait Encoder<Item> {
    type Error: From<io::Error>;

    fn encode(&mut self, item: Item, dst: &mut BytesMut) -> Result<(), Self::Error>;
}
