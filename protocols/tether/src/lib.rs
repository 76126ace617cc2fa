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

//! Bidirectional transparent RPC between peer interpreters.
//!
//! Two peers connected by a byte-stream pair expose arbitrary objects to
//! each other as transparent handles: mutable containers, modules,
//! callables and exceptions all travel as proxies whose operations are
//! forwarded to the owning side, while immutable values are copied.
//! Either peer may issue requests at any time, including nested calls
//! back into a requester whose request is still in flight.
//!
//! The crate is organized around the connection engine:
//!
//! - [`message`]: frame grammar and message kinds,
//! - [`codec`]: value marshalling against the per-connection object tables,
//! - [`tables`]: exported-object and proxy registries with versioned
//!   reclamation,
//! - [`mux`]: the request/response multiplexer over a single stream pair,
//! - [`dispatch`]: execution of inbound requests,
//! - [`proxy`]: client-side handles,
//! - [`interp`]: the local object world (modules, callables, evaluation),
//! - [`client`]: the user-facing connection API,
//! - [`transport`]: byte-stream pair suppliers.

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod interp;
pub mod message;
pub mod mux;
pub mod ops;
pub mod proxy;
pub mod server;
pub mod tables;
pub mod test_utils;
pub mod transport;
pub mod value;

mod client;

pub use client::{connect, Client, Modules, Options};
pub use error::{Error, RemoteError, Result, ScriptError};
pub use mux::Connection;
pub use proxy::{Proxy, ProxyKind};
pub use value::{ObjectRef, Value};
