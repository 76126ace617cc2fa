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

//! Helpers shared by unit and integration tests: in-process peer pairs
//! over the loopback transport.

use std::sync::Arc;

use crate::client::{Client, Options};
use crate::mux::Connection;
use crate::transport;

pub fn init_logging() {
    let _ = tether_logging::init_test_logging();
}

/// Two fully served peers connected back to back in this process. Both
/// sides answer requests, so either client can call the other.
pub fn connected_pair() -> (Client, Client) {
    connected_pair_with(Options::default(), Options::default())
}

pub fn connected_pair_with(a: Options, b: Options) -> (Client, Client) {
    init_logging();
    let (left, right) = transport::pair();
    (Client::over(left, a), Client::over(right, b))
}

/// Two connections with no serve threads. For codec-level tests that
/// never exchange frames.
pub fn unserved_pair() -> (Arc<Connection>, Arc<Connection>) {
    init_logging();
    let (left, right) = transport::pair();
    (Connection::over(left), Connection::over(right))
}
