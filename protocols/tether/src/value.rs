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

//! The dynamic value model.
//!
//! A [`Value`] is either an immutable primitive (copied across the wire),
//! a tuple of values, a live local object (owned by this side, exported
//! to the peer as a proxy descriptor), or a [`Proxy`] handle to an object
//! owned by the peer.
//!
//! Local objects are reference counted; identity is the pointer of the
//! shared allocation, which is what makes identity-preserving marshalling
//! possible: sending the same `ObjectRef` twice reuses the same object id.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{is_well_known_exception, Error, ScriptError};
use crate::interp::Program;
use crate::message::Kind;
use crate::proxy::{Proxy, ProxyKind};

/// Names an exported object within a connection. Never reused.
pub type ObjectId = u64;

#[derive(Debug, Clone)]
pub enum Value {
    /// Nil / absent
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Opaque byte buffer
    Bytes(Vec<u8>),
    /// Slice descriptor, usable as a container index
    Slice(SliceDesc),
    /// Immutable set of hashable primitives
    FrozenSet(Vec<DictKey>),
    /// Fixed sequence; elements marshalled recursively
    Tuple(Vec<Value>),
    /// Live object owned by this side
    Object(ObjectRef),
    /// Handle to an object owned by the peer
    Proxy(Proxy),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceDesc {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// Keys of dicts and elements of sets: the hashable primitives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl DictKey {
    pub fn try_from_value(value: &Value) -> Result<DictKey, ScriptError> {
        Ok(match value {
            Value::Bool(b) => DictKey::Bool(*b),
            Value::Int(i) => DictKey::Int(*i),
            Value::Str(s) => DictKey::Str(s.clone()),
            Value::Bytes(b) => DictKey::Bytes(b.clone()),
            other => {
                return Err(ScriptError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    pub fn into_value(self) -> Value {
        match self {
            DictKey::Bool(b) => Value::Bool(b),
            DictKey::Int(i) => Value::Int(i),
            DictKey::Str(s) => Value::Str(s),
            DictKey::Bytes(b) => Value::Bytes(b),
        }
    }
}

/// Reference to a live local object. Cloning shares the object.
#[derive(Clone)]
pub struct ObjectRef(pub(crate) Arc<Obj>);

/// The kinds of live objects this side can own.
pub enum Obj {
    List(Mutex<Vec<Value>>),
    Dict(Mutex<HashMap<DictKey, Value>>),
    Set(Mutex<HashSet<DictKey>>),
    Module(ModuleDef),
    Callable(NativeFn),
    Exception(ExceptionObj),
    Code(CodeObj),
    /// Iterator over a snapshot of some container's elements
    Iter(IterState),
    /// Generic object: a bag of named attributes
    Plain(AttrTable),
}

pub struct ModuleDef {
    pub name: String,
    pub attrs: Mutex<HashMap<String, Value>>,
}

/// A callable backed by a host closure.
pub struct NativeFn {
    pub name: String,
    #[allow(clippy::type_complexity)]
    pub f: Box<dyn Fn(Vec<Value>, Vec<(String, Value)>) -> Result<Value, Error> + Send + Sync>,
}

pub struct ExceptionObj {
    pub class_name: String,
    pub message: String,
    pub traceback: String,
    pub attrs: Mutex<HashMap<String, Value>>,
}

pub struct CodeObj {
    pub program: Program,
}

pub struct IterState {
    pub items: Mutex<VecDeque<Value>>,
}

#[derive(Default)]
pub struct AttrTable {
    pub attrs: Mutex<HashMap<String, Value>>,
}

impl ObjectRef {
    pub fn new(obj: Obj) -> Self {
        ObjectRef(Arc::new(obj))
    }

    pub fn obj(&self) -> &Obj {
        &self.0
    }

    /// Identity of the object within this process.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn same_object(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn type_name(&self) -> &'static str {
        match self.obj() {
            Obj::List(_) => "list",
            Obj::Dict(_) => "dict",
            Obj::Set(_) => "set",
            Obj::Module(_) => "module",
            Obj::Callable(_) => "function",
            Obj::Exception(_) => "exception",
            Obj::Code(_) => "code",
            Obj::Iter(_) => "iterator",
            Obj::Plain(_) => "object",
        }
    }

    /// Which operator requests the object answers; one bit per operator
    /// kind. Transmitted once in the proxy descriptor so the peer never
    /// has to probe for capabilities over the wire.
    pub fn operator_mask(&self) -> u64 {
        let ops: &[Kind] = match self.obj() {
            Obj::List(_) => &[
                Kind::OpLen,
                Kind::OpGetItem,
                Kind::OpSetItem,
                Kind::OpDelItem,
                Kind::OpContains,
                Kind::OpIter,
                Kind::OpBool,
                Kind::OpAdd,
                Kind::OpMul,
                Kind::OpEq,
                Kind::OpNe,
            ],
            Obj::Dict(_) => &[
                Kind::OpLen,
                Kind::OpGetItem,
                Kind::OpSetItem,
                Kind::OpDelItem,
                Kind::OpContains,
                Kind::OpIter,
                Kind::OpBool,
                Kind::OpEq,
                Kind::OpNe,
            ],
            Obj::Set(_) => &[
                Kind::OpLen,
                Kind::OpContains,
                Kind::OpIter,
                Kind::OpBool,
                Kind::OpEq,
                Kind::OpNe,
            ],
            Obj::Callable(_) => &[Kind::OpCall],
            Obj::Iter(_) => &[Kind::OpIter, Kind::OpNext],
            Obj::Module(_) | Obj::Exception(_) | Obj::Code(_) | Obj::Plain(_) => &[],
        };
        ops.iter().fold(0u64, |mask, op| mask | op.operator_bit())
    }

    /// Proxy kind the peer should manufacture for this object.
    pub fn proxy_kind(&self) -> ProxyKind {
        match self.obj() {
            Obj::List(_) => ProxyKind::List,
            Obj::Dict(_) => ProxyKind::Dict,
            Obj::Set(_) => ProxyKind::Set,
            Obj::Module(_) => ProxyKind::Module,
            Obj::Exception(_) => ProxyKind::Exception,
            Obj::Callable(_) | Obj::Code(_) | Obj::Iter(_) | Obj::Plain(_) => ProxyKind::Object,
        }
    }

    /// Constructor arguments included in the proxy descriptor: only
    /// exceptions carry any, so the peer can rebuild a matching class and
    /// message without a round trip. State of every other kind is fetched
    /// lazily through attribute access.
    pub fn ctor_args(&self) -> Option<Value> {
        match self.obj() {
            Obj::Exception(exc) => {
                let class_name = if is_well_known_exception(&exc.class_name) {
                    exc.class_name.clone()
                } else {
                    "Exception".to_string()
                };
                Some(Value::Tuple(vec![
                    Value::Str(class_name),
                    Value::Str(exc.message.clone()),
                ]))
            }
            _ => None,
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{} at 0x{:x}>", self.type_name(), self.addr())
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Obj::List(items) => write!(f, "List({:?})", items.lock().unwrap().len()),
            Obj::Dict(items) => write!(f, "Dict({:?})", items.lock().unwrap().len()),
            Obj::Set(items) => write!(f, "Set({:?})", items.lock().unwrap().len()),
            Obj::Module(m) => write!(f, "Module({})", m.name),
            Obj::Callable(c) => write!(f, "Callable({})", c.name),
            Obj::Exception(e) => write!(f, "Exception({}: {})", e.class_name, e.message),
            Obj::Code(_) => write!(f, "Code"),
            Obj::Iter(_) => write!(f, "Iter"),
            Obj::Plain(_) => write!(f, "Plain"),
        }
    }
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::Object(ObjectRef::new(Obj::List(Mutex::new(items))))
    }

    pub fn new_dict() -> Value {
        Value::Object(ObjectRef::new(Obj::Dict(Mutex::new(HashMap::new()))))
    }

    pub fn new_set(items: Vec<DictKey>) -> Value {
        Value::Object(ObjectRef::new(Obj::Set(Mutex::new(
            items.into_iter().collect(),
        ))))
    }

    pub fn new_module(name: impl Into<String>, attrs: Vec<(&str, Value)>) -> Value {
        Value::Object(ObjectRef::new(Obj::Module(ModuleDef {
            name: name.into(),
            attrs: Mutex::new(
                attrs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
        })))
    }

    pub fn new_object(attrs: Vec<(&str, Value)>) -> Value {
        Value::Object(ObjectRef::new(Obj::Plain(AttrTable {
            attrs: Mutex::new(
                attrs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
        })))
    }

    /// Wrap a host closure as a callable object.
    pub fn native<F>(name: impl Into<String>, f: F) -> Value
    where
        F: Fn(Vec<Value>, Vec<(String, Value)>) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Value::Object(ObjectRef::new(Obj::Callable(NativeFn {
            name: name.into(),
            f: Box::new(f),
        })))
    }

    pub fn new_exception(
        class_name: impl Into<String>,
        message: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Value {
        Value::Object(ObjectRef::new(Obj::Exception(ExceptionObj {
            class_name: class_name.into(),
            message: message.into(),
            traceback: traceback.into(),
            attrs: Mutex::new(HashMap::new()),
        })))
    }

    pub fn new_code(program: Program) -> Value {
        Value::Object(ObjectRef::new(Obj::Code(CodeObj { program })))
    }

    pub fn new_iter(items: Vec<Value>) -> Value {
        Value::Object(ObjectRef::new(Obj::Iter(IterState {
            items: Mutex::new(items.into()),
        })))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Slice(_) => "slice",
            Value::FrozenSet(_) => "frozenset",
            Value::Tuple(_) => "tuple",
            Value::Object(obj) => obj.type_name(),
            Value::Proxy(_) => "proxy",
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Value::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Result<i64, ScriptError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(ScriptError::type_error(format!(
                "expected an integer, got '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, ScriptError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ScriptError::type_error(format!(
                "expected a string, got '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64, ScriptError> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(*b as i64 as f64),
            other => Err(ScriptError::type_error(format!(
                "expected a number, got '{}'",
                other.type_name()
            ))),
        }
    }
}

/// Structural equality for primitives and tuples, identity for live
/// objects and proxies. Semantic container equality (contents of a list
/// against the contents of a peer's list) lives in [`crate::ops`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Unit, Unit) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Slice(a), Slice(b)) => a == b,
            (FrozenSet(a), FrozenSet(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            (Object(a), Object(b)) => a.same_object(b),
            (Proxy(a), Proxy(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identity_vs_structure() {
        let a = Value::new_list(vec![Value::Int(1)]);
        let b = Value::new_list(vec![Value::Int(1)]);
        assert_ne!(a, b, "distinct lists must not compare identical");
        assert_eq!(a, a.clone(), "a clone shares identity");
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Float(3.0));
    }

    #[test]
    fn test_operator_mask_gates_by_kind() {
        let list = Value::new_list(vec![]);
        let mask = list.as_object().unwrap().operator_mask();
        assert_ne!(mask & Kind::OpLen.operator_bit(), 0);
        assert_ne!(mask & Kind::OpGetItem.operator_bit(), 0);
        assert_eq!(mask & Kind::OpCall.operator_bit(), 0);

        let f = Value::native("f", |_, _| Ok(Value::Unit));
        let mask = f.as_object().unwrap().operator_mask();
        assert_ne!(mask & Kind::OpCall.operator_bit(), 0);
        assert_eq!(mask & Kind::OpLen.operator_bit(), 0);
    }

    #[test]
    fn test_exception_ctor_args() {
        let exc = Value::new_exception("KeyError", "spam", "");
        match exc.as_object().unwrap().ctor_args() {
            Some(Value::Tuple(items)) => {
                assert_eq!(items[0], Value::Str("KeyError".to_string()));
                assert_eq!(items[1], Value::Str("spam".to_string()));
            }
            other => panic!("unexpected ctor args: {:?}", other),
        }

        // Unknown classes decay to the generic base
        let exc = Value::new_exception("FrobnicationError", "x", "");
        match exc.as_object().unwrap().ctor_args() {
            Some(Value::Tuple(items)) => {
                assert_eq!(items[0], Value::Str("Exception".to_string()));
            }
            other => panic!("unexpected ctor args: {:?}", other),
        }
    }

    #[test]
    fn test_dict_key_hashability() {
        assert!(DictKey::try_from_value(&Value::Int(1)).is_ok());
        assert!(DictKey::try_from_value(&Value::Str("k".into())).is_ok());
        assert!(DictKey::try_from_value(&Value::Float(1.0)).is_err());
        assert!(DictKey::try_from_value(&Value::new_list(vec![])).is_err());
    }
}
