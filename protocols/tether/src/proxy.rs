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

//! Client-side handles to objects owned by the peer.
//!
//! A [`Proxy`] forwards every operation to the owning side as a request
//! on its connection. Operators are gated locally on the operator mask
//! delivered in the proxy descriptor, so asking for something the remote
//! object cannot do fails without a round trip.
//!
//! The proxy holds only a weak pointer to its connection (the connection
//! owns the tables that reference the proxy back; the cycle is broken
//! here). Dropping the last handle of a proxy enqueues a pending delete,
//! which drives reclamation of the exported object on the peer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tether_logging::macros::*;

use crate::error::{Error, Result, ScriptError};
use crate::message::Kind;
use crate::mux::Connection;
use crate::tables::Descriptor;
use crate::value::{ObjectId, Value};

/// Kind of the remote object, so the handle can offer the matching
/// convenience surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProxyKind {
    Object = 0,
    Exception = 1,
    Dict = 2,
    List = 3,
    Set = 4,
    Module = 5,
}

impl ProxyKind {
    pub fn from_u8(code: u8) -> Option<ProxyKind> {
        use ProxyKind::*;
        Some(match code {
            0 => Object,
            1 => Exception,
            2 => Dict,
            3 => List,
            4 => Set,
            5 => Module,
            _ => return None,
        })
    }
}

#[derive(Clone)]
pub struct Proxy {
    pub(crate) inner: Arc<ProxyInner>,
}

pub(crate) struct ProxyInner {
    pub(crate) conn: Weak<Connection>,
    pub(crate) id: ObjectId,
    pub(crate) opmask: u64,
    pub(crate) kind: ProxyKind,
    pub(crate) ctor: Option<Value>,
    /// Last version observed for this object id; travels with the
    /// pending delete so the owner can detect stale reclamation.
    pub(crate) version: AtomicU64,
    /// False when GC is disabled for the connection
    pub(crate) reclaim: bool,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if !self.reclaim {
            return;
        }
        // Reclamation runs during teardown; nothing the caller could do
        // with a failure here, so it is logged and swallowed.
        if let Some(conn) = self.conn.upgrade() {
            let version = self.version.load(Ordering::SeqCst);
            trace!("proxy drop: enqueue delete of id={} v={}", self.id, version);
            conn.enqueue_delete(self.id, version);
        }
    }
}

impl Proxy {
    pub(crate) fn manufacture(conn: &Arc<Connection>, desc: &Descriptor, reclaim: bool) -> Proxy {
        Proxy {
            inner: Arc::new(ProxyInner {
                conn: Arc::downgrade(conn),
                id: desc.id,
                opmask: desc.opmask,
                kind: desc.kind,
                ctor: desc.args.clone(),
                version: AtomicU64::new(desc.version),
                reclaim,
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn kind(&self) -> ProxyKind {
        self.inner.kind
    }

    pub(crate) fn ctor(&self) -> Option<&Value> {
        self.inner.ctor.as_ref()
    }

    pub(crate) fn observe_version(&self, version: u64) {
        self.inner.version.store(version, Ordering::SeqCst);
    }

    /// True when the remote object implements the given operator.
    pub fn supports(&self, op: Kind) -> bool {
        op.is_operator() && self.inner.opmask & op.operator_bit() != 0
    }

    fn conn(&self) -> Result<Arc<Connection>> {
        self.inner.conn.upgrade().ok_or(Error::Closed)
    }

    pub(crate) fn as_value(&self) -> Value {
        Value::Proxy(self.clone())
    }

    /// Read a named attribute of the remote object.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        self.conn()?.request(
            Kind::GetAttr,
            Value::Tuple(vec![self.as_value(), Value::Str(name.to_string())]),
        )
    }

    /// Write a named attribute of the remote object.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.conn()?
            .request(
                Kind::SetAttr,
                Value::Tuple(vec![
                    self.as_value(),
                    Value::Str(name.to_string()),
                    value,
                ]),
            )
            .map(|_| ())
    }

    /// Human-readable form of the remote object.
    pub fn str_value(&self) -> Result<String> {
        match self.conn()?.request(Kind::GetStr, self.as_value())? {
            Value::Str(s) => Ok(s),
            other => Err(Error::protocol(format!(
                "str of remote object is not a string: {:?}",
                other
            ))),
        }
    }

    /// Machine-readable form of the remote object.
    pub fn repr_value(&self) -> Result<String> {
        match self.conn()?.request(Kind::GetRepr, self.as_value())? {
            Value::Str(s) => Ok(s),
            other => Err(Error::protocol(format!(
                "repr of remote object is not a string: {:?}",
                other
            ))),
        }
    }

    /// Apply an operator to the remote object.
    pub fn operator(&self, op: Kind, args: Vec<Value>) -> Result<Value> {
        self.operator_with_kwargs(op, args, Vec::new())
    }

    pub fn operator_with_kwargs(
        &self,
        op: Kind,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        if !self.supports(op) {
            return Err(ScriptError::type_error(format!(
                "remote object does not support '{}'",
                op.operator_name()
            ))
            .into());
        }
        let kwargs = kwargs
            .into_iter()
            .map(|(k, v)| Value::Tuple(vec![Value::Str(k), v]))
            .collect();
        self.conn()?.request(
            op,
            Value::Tuple(vec![
                self.as_value(),
                Value::Tuple(args),
                Value::Tuple(kwargs),
            ]),
        )
    }

    /// Invoke the remote object.
    pub fn call(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value> {
        self.operator_with_kwargs(Kind::OpCall, args, kwargs)
    }

    pub fn len(&self) -> Result<usize> {
        match self.operator(Kind::OpLen, vec![])? {
            Value::Int(n) if n >= 0 => Ok(n as usize),
            other => Err(Error::protocol(format!(
                "len of remote object is not a length: {:?}",
                other
            ))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get_item(&self, index: Value) -> Result<Value> {
        self.operator(Kind::OpGetItem, vec![index])
    }

    pub fn set_item(&self, index: Value, value: Value) -> Result<()> {
        self.operator(Kind::OpSetItem, vec![index, value]).map(|_| ())
    }

    pub fn del_item(&self, index: Value) -> Result<()> {
        self.operator(Kind::OpDelItem, vec![index]).map(|_| ())
    }

    pub fn contains(&self, item: Value) -> Result<bool> {
        match self.operator(Kind::OpContains, vec![item])? {
            Value::Bool(b) => Ok(b),
            other => Err(Error::protocol(format!(
                "contains is not a bool: {:?}",
                other
            ))),
        }
    }

    pub fn bool_value(&self) -> Result<bool> {
        match self.operator(Kind::OpBool, vec![])? {
            Value::Bool(b) => Ok(b),
            other => Err(Error::protocol(format!("bool is not a bool: {:?}", other))),
        }
    }

    /// Iterate the remote container. Elements are fetched one by one via
    /// the peer's iterator protocol.
    pub fn iter(&self) -> Result<ProxyIter> {
        let iterator = self.operator(Kind::OpIter, vec![])?;
        Ok(ProxyIter {
            iterator,
            done: false,
        })
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<proxy {:?} id={}>", self.inner.kind, self.inner.id)
    }
}

/// Iterator over a remote container.
pub struct ProxyIter {
    iterator: Value,
    done: bool,
}

impl Iterator for ProxyIter {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Result<Value>> {
        if self.done {
            return None;
        }
        match crate::ops::op_next(&self.iterator) {
            Ok(value) => Some(Ok(value)),
            Err(e) if is_stop_iteration(&e) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn is_stop_iteration(e: &Error) -> bool {
    match e {
        Error::Script(se) => se.class_name == "StopIteration",
        Error::Remote(re) => re.matches("StopIteration"),
        _ => false,
    }
}
