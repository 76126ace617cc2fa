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

//! Framed halves over blocking streams.
//!
//! `FramedRead` reassembles frames from a `Read` half (short reads are
//! buffered until the codec can produce a complete frame), `FramedWrite`
//! serializes a frame and writes it out in full before returning. The
//! halves know nothing about request/response semantics.

use std::io::{self, Read, Write};

use bytes::BytesMut;
use tether_logging::macros::*;

use crate::codec::{Decoder, Encoder};

/// Initial capacity of the read buffer and the granularity of stream reads.
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
pub struct FramedRead<R, D> {
    inner: R,
    codec: D,
    buf: BytesMut,
}

impl<R: Read, D: Decoder> FramedRead<R, D> {
    pub fn new(inner: R, codec: D) -> Self {
        Self {
            inner,
            codec,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Blocks until one complete frame has been read and decoded.
    ///
    /// End of stream is an error: a peer that closes the connection
    /// mid-frame corrupted the stream, and one that closes it between
    /// frames has hung up, which the caller must treat as fatal anyway.
    pub fn recv(&mut self) -> Result<D::Item, D::Error> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(item) = self.codec.decode(&mut self.buf)? {
                return Ok(item);
            }
            let n = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(D::Error::from(e)),
            };
            if n == 0 {
                return Err(D::Error::from(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "end of stream",
                )));
            }
            trace!("framed read: {} bytes buffered", n);
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

#[derive(Debug)]
pub struct FramedWrite<W, E> {
    inner: W,
    codec: E,
    buf: BytesMut,
}

impl<W: Write, E> FramedWrite<W, E> {
    pub fn new(inner: W, codec: E) -> Self {
        Self {
            inner,
            codec,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Serializes `item` and writes the whole frame out, flushing the
    /// stream before returning.
    pub fn send<I>(&mut self, item: I) -> Result<(), E::Error>
    where
        E: Encoder<I>,
    {
        self.buf.clear();
        self.codec.encode(item, &mut self.buf)?;
        trace!("framed write: {} bytes", self.buf.len());
        self.inner.write_all(&self.buf).map_err(E::Error::from)?;
        self.inner.flush().map_err(E::Error::from)?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    /// Toy codec: one-byte length prefix followed by payload.
    #[derive(Debug, Default)]
    struct ShortCodec;

    impl Decoder for ShortCodec {
        type Item = Vec<u8>;
        type Error = Error;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, Error> {
            if src.is_empty() {
                return Ok(None);
            }
            let len = src[0] as usize;
            if src.len() < 1 + len {
                return Ok(None);
            }
            let frame = src.split_to(1 + len);
            Ok(Some(frame[1..].to_vec()))
        }
    }

    impl Encoder<Vec<u8>> for ShortCodec {
        type Error = Error;

        fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Error> {
            assert!(item.len() <= 255);
            dst.extend_from_slice(&[item.len() as u8]);
            dst.extend_from_slice(&item);
            Ok(())
        }
    }

    struct Trickle(Vec<u8>, usize);

    impl Read for Trickle {
        // One byte at a time, to exercise short-read reassembly
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.1 >= self.0.len() {
                return Ok(0);
            }
            buf[0] = self.0[self.1];
            self.1 += 1;
            Ok(1)
        }
    }

    #[test]
    fn test_framed_roundtrip() {
        let mut wire = Vec::new();
        {
            let mut tx = FramedWrite::new(&mut wire, ShortCodec::default());
            tx.send(b"hello".to_vec()).expect("send failed");
            tx.send(b"".to_vec()).expect("send failed");
        }

        let mut rx = FramedRead::new(Trickle(wire, 0), ShortCodec::default());
        assert_eq!(rx.recv().expect("recv failed"), b"hello".to_vec());
        assert_eq!(rx.recv().expect("recv failed"), b"".to_vec());
        // Stream exhausted at a frame boundary still surfaces as an error
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_eof_mid_frame() {
        let mut rx = FramedRead::new(Trickle(vec![5u8, b'x'], 0), ShortCodec::default());
        match rx.recv() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF error, got {:?}", other.map(|_| ())),
        }
    }
}
