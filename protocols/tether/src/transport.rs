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

//! Byte-stream pair suppliers.
//!
//! A transport hands the connection engine a `Read`/`Write` pair plus a
//! shutdown hook that unblocks a reader mid-`read` (that is all `close()`
//! needs from the outside world). Daemon transports connect to an already
//! running peer, so the client pushes no bootstrap data.
//!
//! Shipped here: `tcp` for socket daemons, and an in-memory loopback pair
//! used by tests and same-process peers.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

/// What a transport must deliver for one connection.
pub struct StreamPair {
    pub rx: Box<dyn Read + Send>,
    pub tx: Box<dyn Write + Send>,
    /// Closes both directions; must be callable from any thread while a
    /// reader is blocked
    pub shutdown: Box<dyn FnMut() + Send>,
}

pub trait Transport: Send + Sync {
    fn open(&mut self) -> Result<StreamPair>;

    /// Daemon transports connect to a peer that is already running; no
    /// bootstrap push happens on connect.
    fn is_daemon(&self) -> bool {
        true
    }

    /// Optional fast-path file transfer. `None` means "use the generic
    /// fallback through the peer's fs module".
    fn put_file(&self, _local: &Path, _remote: &str) -> Option<Result<()>> {
        None
    }

    fn get_file(&self, _remote: &str, _local: &Path) -> Option<Result<()>> {
        None
    }
}

/// Resolve a `"<transport>:<address>"` target.
pub fn create(target: &str) -> Result<Box<dyn Transport>> {
    let (scheme, address) = target
        .split_once(':')
        .ok_or_else(|| Error::protocol("missing colon in transport target"))?;
    match scheme {
        "tcp" => Ok(Box::new(TcpTransport {
            address: address.to_string(),
        })),
        other => Err(Error::protocol(format!(
            "transport '{}' does not exist",
            other
        ))),
    }
}

pub struct TcpTransport {
    address: String,
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<StreamPair> {
        let stream = TcpStream::connect(self.address.as_str()).map_err(Error::Io)?;
        stream_pair_from_tcp(stream)
    }
}

/// Split a TCP stream into the engine's stream pair.
pub(crate) fn stream_pair_from_tcp(stream: TcpStream) -> Result<StreamPair> {
    stream.set_nodelay(true).ok();
    let rx = stream.try_clone().map_err(Error::Io)?;
    let closer = stream.try_clone().map_err(Error::Io)?;
    Ok(StreamPair {
        rx: Box::new(rx),
        tx: Box::new(stream),
        shutdown: Box::new(move || {
            let _ = closer.shutdown(Shutdown::Both);
        }),
    })
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One direction of an in-memory duplex stream.
#[derive(Clone, Default)]
struct Pipe(Arc<(Mutex<PipeState>, Condvar)>);

impl Pipe {
    fn close(&self) {
        let (state, cond) = &*self.0;
        state.lock().expect("BUG: pipe mutex poisoned").closed = true;
        cond.notify_all();
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let (state, cond) = &*self.0;
        let mut state = state.lock().expect("BUG: pipe mutex poisoned");
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        state.buf.extend(data);
        cond.notify_all();
        Ok(data.len())
    }

    fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        let (state, cond) = &*self.0;
        let mut state = state.lock().expect("BUG: pipe mutex poisoned");
        while state.buf.is_empty() {
            if state.closed {
                return Ok(0);
            }
            state = cond.wait(state).expect("BUG: pipe mutex poisoned");
        }
        let n = out.len().min(state.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = state.buf.pop_front().expect("BUG: checked pipe length");
        }
        Ok(n)
    }
}

struct PipeReader(Pipe);

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

struct PipeWriter(Pipe);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn pipe_endpoint(rx: Pipe, tx: Pipe) -> StreamPair {
    let close_rx = rx.clone();
    let close_tx = tx.clone();
    StreamPair {
        rx: Box::new(PipeReader(rx)),
        tx: Box::new(PipeWriter(tx)),
        shutdown: Box::new(move || {
            close_rx.close();
            close_tx.close();
        }),
    }
}

/// In-memory duplex pair: two connected endpoints within one process.
pub fn pair() -> (StreamPair, StreamPair) {
    let a_to_b = Pipe::default();
    let b_to_a = Pipe::default();
    (
        pipe_endpoint(b_to_a.clone(), a_to_b.clone()),
        pipe_endpoint(a_to_b, b_to_a),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_loopback_pair_shuttles_bytes() {
        let (mut a, mut b) = pair();
        a.tx.write_all(b"ping").expect("write failed");
        let mut buf = [0u8; 4];
        b.rx.read_exact(&mut buf).expect("read failed");
        assert_eq!(&buf, b"ping");

        b.tx.write_all(b"pong").expect("write failed");
        a.rx.read_exact(&mut buf).expect("read failed");
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_shutdown_unblocks_reader() {
        let (a, mut b) = pair();
        let reader = std::thread::spawn(move || {
            let mut a = a;
            let mut buf = [0u8; 1];
            a.rx.read(&mut buf)
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        (b.shutdown)();
        let n = reader
            .join()
            .expect("reader panicked")
            .expect("read after shutdown must be EOF");
        assert_eq!(n, 0);
    }

    #[test]
    fn test_create_parses_targets() {
        assert!(create("tcp:127.0.0.1:9999").is_ok());
        assert!(create("smb:whatever").is_err());
        assert!(create("no-colon").is_err());
    }
}
