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

//! Socket daemon: accepts TCP peers and serves each connection on its
//! own thread. The counterpart of the `tcp` transport.

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use tether_logging::macros::*;

use crate::error::{Error, Result};
use crate::mux::Connection;
use crate::transport;

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Server> {
        let listener = TcpListener::bind(addr).map_err(Error::Io)?;
        Ok(Server { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Io)
    }

    /// Accept one peer and build its connection. The caller drives
    /// serving (usually by spawning [`Connection::serve_forever`]).
    pub fn accept(&self) -> Result<Arc<Connection>> {
        let (stream, peer) = self.listener.accept().map_err(Error::Io)?;
        info!("accepted connection from {}", peer);
        let pair = transport::stream_pair_from_tcp(stream)?;
        Ok(Connection::over(pair))
    }

    /// Accept peers forever, one serve thread per connection.
    pub fn serve_forever(&self) -> Result<()> {
        loop {
            let conn = self.accept()?;
            thread::Builder::new()
                .name(format!("tether-serve-{}", conn.id()))
                .spawn(move || conn.serve_forever())
                .map_err(Error::Io)?;
        }
    }
}
