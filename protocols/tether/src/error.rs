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

//! Module that represents RPC runtime errors

use std::io;

use thiserror::Error;

use crate::proxy::Proxy;

/// Names of the exception classes both peers know how to reconstruct.
/// An exception of any other class arrives as the generic `"Exception"`.
pub const WELL_KNOWN_EXCEPTIONS: &[&str] = &[
    "AttributeError",
    "ImportError",
    "IndexError",
    "KeyError",
    "NameError",
    "RuntimeError",
    "StopIteration",
    "SyntaxError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

lazy_static::lazy_static! {
    static ref WELL_KNOWN: std::collections::HashSet<&'static str> =
        WELL_KNOWN_EXCEPTIONS.iter().copied().collect();
}

pub fn is_well_known_exception(class_name: &str) -> bool {
    WELL_KNOWN.contains(class_name)
}

#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure. Fatal: the connection transitions to closed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any operation after `close()`, or a wakeup caused by `close()`.
    #[error("connection closed")]
    Closed,

    /// Undecodable payload, unknown message kind, unknown back-reference
    /// or target thread. The connection is closed because its state may
    /// be corrupt.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An error raised by the local interpreter surface.
    #[error("{0}")]
    Script(#[from] ScriptError),

    /// An exception raised by a request handler on the peer.
    #[error("{0}")]
    Remote(Box<RemoteError>),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True when the error means the connection is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Closed | Error::Protocol(_))
    }
}

impl From<tether_wire::Error> for Error {
    fn from(e: tether_wire::Error) -> Self {
        match e {
            tether_wire::Error::Io(e) => Error::Io(e),
            tether_wire::Error::Decode(msg) => Error::Protocol(msg),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Error::Remote(Box::new(e))
    }
}

/// An error raised by the interpreter surface on this side: a failed
/// attribute lookup, an unsupported operator, an undefined name, ...
///
/// The class name is taken from [`WELL_KNOWN_EXCEPTIONS`] so the peer can
/// reconstruct a matching exception.
#[derive(Debug, Clone, Error)]
#[error("{class_name}: {message}")]
pub struct ScriptError {
    pub class_name: &'static str,
    pub message: String,
}

impl ScriptError {
    pub fn new(class_name: &'static str, message: impl Into<String>) -> Self {
        Self {
            class_name,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{}' is not defined", name))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    pub fn key_error(key: impl Into<String>) -> Self {
        Self::new("KeyError", key)
    }

    pub fn index_error() -> Self {
        Self::new("IndexError", "index out of range")
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    pub fn import_error(name: &str) -> Self {
        Self::new("ImportError", format!("no module named '{}'", name))
    }

    pub fn zero_division() -> Self {
        Self::new("ZeroDivisionError", "division by zero")
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    pub fn stop_iteration() -> Self {
        Self::new("StopIteration", "")
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }
}

/// An exception raised by a request handler on the peer.
///
/// Carries the class name and message copied out of the remote exception
/// object plus a proxy to the live object itself; the traceback stays on
/// the peer and is fetched on demand through the proxy.
#[derive(Debug, Error)]
#[error("remote {class_name}: {message}")]
pub struct RemoteError {
    pub class_name: String,
    pub message: String,
    /// Handle to the live exception object on the peer. `None` only when
    /// the peer sent something that was not an exception object.
    pub proxy: Option<Proxy>,
}

impl RemoteError {
    /// True when the remote exception is of the given well-known class;
    /// the replacement for a typed catch clause.
    pub fn matches(&self, class_name: &str) -> bool {
        self.class_name == class_name
    }

    /// Fetch the traceback recorded on the peer at raise time.
    pub fn traceback(&self) -> Result<String> {
        let proxy = self
            .proxy
            .as_ref()
            .ok_or_else(|| Error::protocol("remote exception carries no object"))?;
        match proxy.get_attr("traceback")? {
            crate::value::Value::Str(s) => Ok(s),
            other => Err(Error::protocol(format!(
                "traceback attribute is not a string: {:?}",
                other
            ))),
        }
    }
}

/// A specialized `Result` type bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_well_known_namespace() {
        assert!(is_well_known_exception("TypeError"));
        assert!(is_well_known_exception("StopIteration"));
        assert!(!is_well_known_exception("Exception"));
        assert!(!is_well_known_exception("SegfaultError"));
    }

    #[test]
    fn test_script_error_display() {
        let e = ScriptError::name_error("spam");
        assert_eq!(e.to_string(), "NameError: name 'spam' is not defined");
    }
}
