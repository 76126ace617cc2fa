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

//! Transport-agnostic framed messaging over blocking byte streams.
//!
//! A protocol plugs in by providing a [`Framing`] implementation that
//! groups its frame types with an encoder/decoder pair;
//! [`FramedRead`]/[`FramedWrite`] then drive any `Read`/`Write` half.

// Bytes is re-exported here for the benefit of dependant crates.
// That way, the buffer dependency is specified in one place.
pub use bytes;

pub mod codec;
pub use codec::{Decoder, Encoder};

mod framing;
pub use framing::Framing;

mod connection;
pub use connection::{FramedRead, FramedWrite};

mod error;
pub use error::{Error, Result};
