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

//! Polymorphic operations over values.
//!
//! Every operation dispatches on the target: primitives and local objects
//! are handled in place, proxies forward the operation to the owning peer
//! as an RPC request. The dispatcher and the evaluator both call through
//! this module, which is what lets a peer's handler transparently operate
//! on values that live on the other side.

use std::collections::HashMap;

use crate::error::{Error, Result, ScriptError};
use crate::message::Kind;
use crate::value::{DictKey, Obj, ObjectRef, SliceDesc, Value};

/// Entry point for operator request kinds (and for the evaluator's
/// operators). `kwargs` are only meaningful for `OpCall`.
pub fn operator(
    op: Kind,
    target: &Value,
    mut args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value> {
    if let Value::Proxy(p) = target {
        return p.operator_with_kwargs(op, args, kwargs);
    }
    match op {
        Kind::OpCall => call(target, args, kwargs),
        Kind::OpLen => Ok(Value::Int(op_len(target)? as i64)),
        Kind::OpGetItem => get_item(target, &take_arg(&mut args, 0, op)?),
        Kind::OpSetItem => {
            let index = take_arg(&mut args, 0, op)?;
            let value = take_arg(&mut args, 1, op)?;
            set_item(target, &index, value)?;
            Ok(Value::Unit)
        }
        Kind::OpDelItem => {
            del_item(target, &take_arg(&mut args, 0, op)?)?;
            Ok(Value::Unit)
        }
        Kind::OpContains => Ok(Value::Bool(contains(target, &take_arg(&mut args, 0, op)?)?)),
        Kind::OpIter => iter_value(target),
        Kind::OpNext => op_next(target),
        Kind::OpBool => Ok(Value::Bool(truthy(target)?)),
        Kind::OpNeg => neg(target),
        Kind::OpAdd
        | Kind::OpSub
        | Kind::OpMul
        | Kind::OpDiv
        | Kind::OpFloorDiv
        | Kind::OpMod
        | Kind::OpEq
        | Kind::OpNe
        | Kind::OpLt
        | Kind::OpLe
        | Kind::OpGt
        | Kind::OpGe => {
            let rhs = take_arg(&mut args, 0, op)?;
            bin_op(op, target, &rhs)
        }
        other => Err(Error::protocol(format!(
            "message kind {:?} is not an operator",
            other
        ))),
    }
}

fn take_arg(args: &mut Vec<Value>, index: usize, op: Kind) -> Result<Value> {
    if index < args.len() {
        Ok(args[index].clone())
    } else {
        Err(ScriptError::type_error(format!(
            "operator '{}' is missing argument {}",
            op.operator_name(),
            index
        ))
        .into())
    }
}

pub fn get_attr(target: &Value, name: &str) -> Result<Value> {
    match target {
        Value::Proxy(p) => p.get_attr(name),
        Value::Object(obj) => object_get_attr(obj, name),
        other => Err(ScriptError::attribute_error(other.type_name(), name).into()),
    }
}

pub fn set_attr(target: &Value, name: &str, value: Value) -> Result<()> {
    match target {
        Value::Proxy(p) => p.set_attr(name, value),
        Value::Object(obj) => match obj.obj() {
            Obj::Module(m) => {
                m.attrs
                    .lock()
                    .expect("BUG: module attrs mutex poisoned")
                    .insert(name.to_string(), value);
                Ok(())
            }
            Obj::Plain(t) => {
                t.attrs
                    .lock()
                    .expect("BUG: attr table mutex poisoned")
                    .insert(name.to_string(), value);
                Ok(())
            }
            Obj::Exception(e) => {
                e.attrs
                    .lock()
                    .expect("BUG: exception attrs mutex poisoned")
                    .insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(ScriptError::attribute_error(obj.type_name(), name).into()),
        },
        other => Err(ScriptError::attribute_error(other.type_name(), name).into()),
    }
}

pub fn call(target: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value> {
    match target {
        Value::Proxy(p) => p.call(args, kwargs),
        Value::Object(obj) => match obj.obj() {
            Obj::Callable(nf) => (nf.f)(args, kwargs),
            _ => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                obj.type_name()
            ))
            .into()),
        },
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))
        .into()),
    }
}

pub fn op_len(target: &Value) -> Result<usize> {
    match target {
        Value::Proxy(p) => p.len(),
        Value::Str(s) => Ok(s.chars().count()),
        Value::Bytes(b) => Ok(b.len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::FrozenSet(items) => Ok(items.len()),
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => Ok(items.lock().expect("BUG: list mutex poisoned").len()),
            Obj::Dict(items) => Ok(items.lock().expect("BUG: dict mutex poisoned").len()),
            Obj::Set(items) => Ok(items.lock().expect("BUG: set mutex poisoned").len()),
            _ => Err(no_len(obj.type_name())),
        },
        other => Err(no_len(other.type_name())),
    }
}

fn no_len(type_name: &str) -> Error {
    ScriptError::type_error(format!("object of type '{}' has no len()", type_name)).into()
}

pub fn truthy(target: &Value) -> Result<bool> {
    Ok(match target {
        Value::Unit => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        Value::Slice(_) => true,
        Value::FrozenSet(items) => !items.is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => !items.lock().expect("BUG: list mutex poisoned").is_empty(),
            Obj::Dict(items) => !items.lock().expect("BUG: dict mutex poisoned").is_empty(),
            Obj::Set(items) => !items.lock().expect("BUG: set mutex poisoned").is_empty(),
            _ => true,
        },
        Value::Proxy(p) => {
            if p.supports(Kind::OpBool) {
                p.bool_value()?
            } else {
                true
            }
        }
    })
}

pub fn get_item(target: &Value, index: &Value) -> Result<Value> {
    match target {
        Value::Proxy(p) => p.get_item(index.clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match index {
                Value::Slice(desc) => {
                    let (start, stop) = slice_range(desc, chars.len())?;
                    Ok(Value::Str(chars[start..stop].iter().collect()))
                }
                _ => {
                    let i = resolve_index(index.as_int()?, chars.len())?;
                    Ok(Value::Str(chars[i].to_string()))
                }
            }
        }
        Value::Bytes(b) => match index {
            Value::Slice(desc) => {
                let (start, stop) = slice_range(desc, b.len())?;
                Ok(Value::Bytes(b[start..stop].to_vec()))
            }
            _ => {
                let i = resolve_index(index.as_int()?, b.len())?;
                Ok(Value::Int(b[i] as i64))
            }
        },
        Value::Tuple(items) => match index {
            Value::Slice(desc) => {
                let (start, stop) = slice_range(desc, items.len())?;
                Ok(Value::Tuple(items[start..stop].to_vec()))
            }
            _ => {
                let i = resolve_index(index.as_int()?, items.len())?;
                Ok(items[i].clone())
            }
        },
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => {
                let items = items.lock().expect("BUG: list mutex poisoned");
                match index {
                    Value::Slice(desc) => {
                        let (start, stop) = slice_range(desc, items.len())?;
                        Ok(Value::new_list(items[start..stop].to_vec()))
                    }
                    _ => {
                        let i = resolve_index(index.as_int()?, items.len())?;
                        Ok(items[i].clone())
                    }
                }
            }
            Obj::Dict(items) => {
                let key = DictKey::try_from_value(index)?;
                items
                    .lock()
                    .expect("BUG: dict mutex poisoned")
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ScriptError::key_error(format!("{:?}", key)).into())
            }
            _ => Err(not_subscriptable(obj.type_name())),
        },
        other => Err(not_subscriptable(other.type_name())),
    }
}

fn not_subscriptable(type_name: &str) -> Error {
    ScriptError::type_error(format!("'{}' object is not subscriptable", type_name)).into()
}

pub fn set_item(target: &Value, index: &Value, value: Value) -> Result<()> {
    match target {
        Value::Proxy(p) => p.set_item(index.clone(), value),
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => {
                let mut items = items.lock().expect("BUG: list mutex poisoned");
                let i = resolve_index(index.as_int()?, items.len())?;
                items[i] = value;
                Ok(())
            }
            Obj::Dict(items) => {
                let key = DictKey::try_from_value(index)?;
                items
                    .lock()
                    .expect("BUG: dict mutex poisoned")
                    .insert(key, value);
                Ok(())
            }
            _ => Err(no_item_assignment(obj.type_name())),
        },
        other => Err(no_item_assignment(other.type_name())),
    }
}

fn no_item_assignment(type_name: &str) -> Error {
    ScriptError::type_error(format!(
        "'{}' object does not support item assignment",
        type_name
    ))
    .into()
}

pub fn del_item(target: &Value, index: &Value) -> Result<()> {
    match target {
        Value::Proxy(p) => p.del_item(index.clone()),
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => {
                let mut items = items.lock().expect("BUG: list mutex poisoned");
                let i = resolve_index(index.as_int()?, items.len())?;
                items.remove(i);
                Ok(())
            }
            Obj::Dict(items) => {
                let key = DictKey::try_from_value(index)?;
                items
                    .lock()
                    .expect("BUG: dict mutex poisoned")
                    .remove(&key)
                    .map(|_| ())
                    .ok_or_else(|| -> Error { ScriptError::key_error(format!("{:?}", key)).into() })
            }
            _ => Err(no_item_assignment(obj.type_name())),
        },
        other => Err(no_item_assignment(other.type_name())),
    }
}

pub fn contains(target: &Value, item: &Value) -> Result<bool> {
    match target {
        Value::Proxy(p) => p.contains(item.clone()),
        Value::Str(s) => Ok(s.contains(item.as_str()?)),
        Value::Tuple(items) => {
            for candidate in items {
                if semantic_eq(candidate, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::FrozenSet(items) => {
            let key = DictKey::try_from_value(item)?;
            Ok(items.contains(&key))
        }
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => {
                let items = items.lock().expect("BUG: list mutex poisoned").clone();
                for candidate in &items {
                    if semantic_eq(candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Obj::Dict(items) => {
                let key = DictKey::try_from_value(item)?;
                Ok(items
                    .lock()
                    .expect("BUG: dict mutex poisoned")
                    .contains_key(&key))
            }
            Obj::Set(items) => {
                let key = DictKey::try_from_value(item)?;
                Ok(items.lock().expect("BUG: set mutex poisoned").contains(&key))
            }
            _ => Err(not_iterable(obj.type_name())),
        },
        other => Err(not_iterable(other.type_name())),
    }
}

fn not_iterable(type_name: &str) -> Error {
    ScriptError::type_error(format!("'{}' object is not iterable", type_name)).into()
}

/// Produce an iterator object over the target's elements. Local
/// containers are snapshot; remote containers go through the peer's
/// iterator protocol.
pub fn iter_value(target: &Value) -> Result<Value> {
    match target {
        Value::Proxy(p) => p.operator(Kind::OpIter, vec![]),
        Value::Str(s) => Ok(Value::new_iter(
            s.chars().map(|c| Value::Str(c.to_string())).collect(),
        )),
        Value::Bytes(b) => Ok(Value::new_iter(
            b.iter().map(|b| Value::Int(*b as i64)).collect(),
        )),
        Value::Tuple(items) => Ok(Value::new_iter(items.clone())),
        Value::FrozenSet(items) => Ok(Value::new_iter(
            items.iter().map(|k| k.clone().into_value()).collect(),
        )),
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => Ok(Value::new_iter(
                items.lock().expect("BUG: list mutex poisoned").clone(),
            )),
            Obj::Dict(items) => Ok(Value::new_iter(
                items
                    .lock()
                    .expect("BUG: dict mutex poisoned")
                    .keys()
                    .map(|k| k.clone().into_value())
                    .collect(),
            )),
            Obj::Set(items) => Ok(Value::new_iter(
                items
                    .lock()
                    .expect("BUG: set mutex poisoned")
                    .iter()
                    .map(|k| k.clone().into_value())
                    .collect(),
            )),
            Obj::Iter(_) => Ok(target.clone()),
            _ => Err(not_iterable(obj.type_name())),
        },
        other => Err(not_iterable(other.type_name())),
    }
}

/// Advance an iterator object; raises StopIteration at the end.
pub fn op_next(target: &Value) -> Result<Value> {
    match target {
        Value::Proxy(p) => p.operator(Kind::OpNext, vec![]),
        Value::Object(obj) => match obj.obj() {
            Obj::Iter(state) => state
                .items
                .lock()
                .expect("BUG: iterator mutex poisoned")
                .pop_front()
                .ok_or_else(|| ScriptError::stop_iteration().into()),
            _ => Err(ScriptError::type_error(format!(
                "'{}' object is not an iterator",
                obj.type_name()
            ))
            .into()),
        },
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not an iterator",
            other.type_name()
        ))
        .into()),
    }
}

pub fn neg(target: &Value) -> Result<Value> {
    match target {
        Value::Proxy(p) => p.operator(Kind::OpNeg, vec![]),
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::value_error("integer overflow").into()),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))
        .into()),
    }
}

/// Equality that looks through numeric widths and container contents.
/// When either side is a proxy supporting equality, the owning peer
/// decides.
pub fn semantic_eq(a: &Value, b: &Value) -> Result<bool> {
    if let Value::Proxy(p) = a {
        if p.supports(Kind::OpEq) {
            return truthy(&p.operator(Kind::OpEq, vec![b.clone()])?);
        }
        return Ok(matches!(b, Value::Proxy(q) if p == q));
    }
    if let Value::Proxy(_) = b {
        return semantic_eq(b, a);
    }
    match (a, b) {
        (Value::Tuple(xs), Value::Tuple(ys)) => seq_eq(xs, ys),
        (Value::Object(x), Value::Object(y)) => match (x.obj(), y.obj()) {
            (Obj::List(xs), Obj::List(ys)) => {
                let xs = xs.lock().expect("BUG: list mutex poisoned").clone();
                let ys = ys.lock().expect("BUG: list mutex poisoned").clone();
                seq_eq(&xs, &ys)
            }
            (Obj::Dict(xs), Obj::Dict(ys)) => {
                let xs = xs.lock().expect("BUG: dict mutex poisoned").clone();
                let ys = ys.lock().expect("BUG: dict mutex poisoned").clone();
                dict_eq(&xs, &ys)
            }
            (Obj::Set(xs), Obj::Set(ys)) => {
                let xs = xs.lock().expect("BUG: set mutex poisoned").clone();
                let ys = ys.lock().expect("BUG: set mutex poisoned").clone();
                Ok(xs == ys)
            }
            _ => Ok(x.same_object(y)),
        },
        _ => Ok(loose_eq(a, b)),
    }
}

fn seq_eq(xs: &[Value], ys: &[Value]) -> Result<bool> {
    if xs.len() != ys.len() {
        return Ok(false);
    }
    for (x, y) in xs.iter().zip(ys) {
        if !semantic_eq(x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn dict_eq(xs: &HashMap<DictKey, Value>, ys: &HashMap<DictKey, Value>) -> Result<bool> {
    if xs.len() != ys.len() {
        return Ok(false);
    }
    for (key, x) in xs {
        match ys.get(key) {
            Some(y) if semantic_eq(x, y)? => (),
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Structural equality with numeric widening; no container recursion.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Bool(x), Value::Int(y)) | (Value::Int(y), Value::Bool(x)) => *x as i64 == *y,
        _ => a == b,
    }
}

pub fn bin_op(op: Kind, lhs: &Value, rhs: &Value) -> Result<Value> {
    if let Value::Proxy(p) = lhs {
        return p.operator(op, vec![rhs.clone()]);
    }
    match op {
        Kind::OpEq => return Ok(Value::Bool(semantic_eq(lhs, rhs)?)),
        Kind::OpNe => return Ok(Value::Bool(!semantic_eq(lhs, rhs)?)),
        _ => (),
    }
    if let Value::Object(obj) = lhs {
        return object_bin_op(op, obj, rhs);
    }
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_bin_op(op, *a, *b),
        (Value::Bool(a), Value::Int(b)) => int_bin_op(op, *a as i64, *b),
        (Value::Int(a), Value::Bool(b)) => int_bin_op(op, *a, *b as i64),
        (Value::Bool(a), Value::Bool(b)) => int_bin_op(op, *a as i64, *b as i64),
        (Value::Float(_), _) | (_, Value::Float(_))
            if lhs.as_f64().is_ok() && rhs.as_f64().is_ok() =>
        {
            float_bin_op(op, lhs.as_f64()?, rhs.as_f64()?)
        }
        (Value::Str(a), Value::Str(b)) => str_bin_op(op, a, b),
        (Value::Str(s), Value::Int(n)) if op == Kind::OpMul => Ok(Value::Str(repeat_str(s, *n))),
        (Value::Int(n), Value::Str(s)) if op == Kind::OpMul => Ok(Value::Str(repeat_str(s, *n))),
        (Value::Bytes(a), Value::Bytes(b)) if op == Kind::OpAdd => {
            let mut out = a.clone();
            out.extend_from_slice(b);
            Ok(Value::Bytes(out))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == Kind::OpAdd => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Tuple(out))
        }
        (Value::Tuple(items), Value::Int(n)) if op == Kind::OpMul => {
            Ok(Value::Tuple(repeat_vec(items, *n)))
        }
        _ => Err(unsupported_operands(op, lhs, rhs)),
    }
}

fn object_bin_op(op: Kind, obj: &ObjectRef, rhs: &Value) -> Result<Value> {
    match obj.obj() {
        Obj::List(items) => {
            let snapshot = items.lock().expect("BUG: list mutex poisoned").clone();
            match (op, rhs) {
                (Kind::OpAdd, Value::Object(other)) => {
                    if let Obj::List(other_items) = other.obj() {
                        let mut out = snapshot;
                        out.extend(
                            other_items
                                .lock()
                                .expect("BUG: list mutex poisoned")
                                .iter()
                                .cloned(),
                        );
                        return Ok(Value::new_list(out));
                    }
                    Err(unsupported_operands(op, &Value::Object(obj.clone()), rhs))
                }
                (Kind::OpAdd, Value::Tuple(other_items)) => {
                    let mut out = snapshot;
                    out.extend(other_items.iter().cloned());
                    Ok(Value::new_list(out))
                }
                (Kind::OpMul, Value::Int(n)) => Ok(Value::new_list(repeat_vec(&snapshot, *n))),
                _ => Err(unsupported_operands(op, &Value::Object(obj.clone()), rhs)),
            }
        }
        _ => Err(unsupported_operands(op, &Value::Object(obj.clone()), rhs)),
    }
}

fn unsupported_operands(op: Kind, lhs: &Value, rhs: &Value) -> Error {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.operator_name(),
        lhs.type_name(),
        rhs.type_name()
    ))
    .into()
}

fn repeat_str(s: &str, n: i64) -> String {
    if n <= 0 {
        String::new()
    } else {
        s.repeat(n as usize)
    }
}

fn repeat_vec(items: &[Value], n: i64) -> Vec<Value> {
    if n <= 0 {
        Vec::new()
    } else {
        let mut out = Vec::with_capacity(items.len() * n as usize);
        for _ in 0..n {
            out.extend(items.iter().cloned());
        }
        out
    }
}

fn int_bin_op(op: Kind, a: i64, b: i64) -> Result<Value> {
    let overflow = || -> Error { ScriptError::value_error("integer overflow").into() };
    Ok(match op {
        Kind::OpAdd => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        Kind::OpSub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        Kind::OpMul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        Kind::OpDiv => {
            if b == 0 {
                return Err(ScriptError::zero_division().into());
            }
            Value::Float(a as f64 / b as f64)
        }
        Kind::OpFloorDiv => {
            if b == 0 {
                return Err(ScriptError::zero_division().into());
            }
            Value::Int(floor_div(a, b))
        }
        Kind::OpMod => {
            if b == 0 {
                return Err(ScriptError::zero_division().into());
            }
            Value::Int(a - floor_div(a, b).checked_mul(b).ok_or_else(overflow)?)
        }
        Kind::OpLt => Value::Bool(a < b),
        Kind::OpLe => Value::Bool(a <= b),
        Kind::OpGt => Value::Bool(a > b),
        Kind::OpGe => Value::Bool(a >= b),
        _ => {
            return Err(unsupported_operands(op, &Value::Int(a), &Value::Int(b)));
        }
    })
}

/// Floor division with sign semantics matching the evaluator's surface
/// language (quotient rounds toward negative infinity).
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn float_bin_op(op: Kind, a: f64, b: f64) -> Result<Value> {
    Ok(match op {
        Kind::OpAdd => Value::Float(a + b),
        Kind::OpSub => Value::Float(a - b),
        Kind::OpMul => Value::Float(a * b),
        Kind::OpDiv => {
            if b == 0.0 {
                return Err(ScriptError::zero_division().into());
            }
            Value::Float(a / b)
        }
        Kind::OpFloorDiv => {
            if b == 0.0 {
                return Err(ScriptError::zero_division().into());
            }
            Value::Float((a / b).floor())
        }
        Kind::OpMod => {
            if b == 0.0 {
                return Err(ScriptError::zero_division().into());
            }
            Value::Float(a - (a / b).floor() * b)
        }
        Kind::OpLt => Value::Bool(a < b),
        Kind::OpLe => Value::Bool(a <= b),
        Kind::OpGt => Value::Bool(a > b),
        Kind::OpGe => Value::Bool(a >= b),
        _ => {
            return Err(unsupported_operands(op, &Value::Float(a), &Value::Float(b)));
        }
    })
}

fn str_bin_op(op: Kind, a: &str, b: &str) -> Result<Value> {
    Ok(match op {
        Kind::OpAdd => Value::Str(format!("{}{}", a, b)),
        Kind::OpLt => Value::Bool(a < b),
        Kind::OpLe => Value::Bool(a <= b),
        Kind::OpGt => Value::Bool(a > b),
        Kind::OpGe => Value::Bool(a >= b),
        _ => {
            return Err(unsupported_operands(
                op,
                &Value::Str(a.to_string()),
                &Value::Str(b.to_string()),
            ));
        }
    })
}

fn resolve_index(index: i64, len: usize) -> Result<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ScriptError::index_error().into());
    }
    Ok(resolved as usize)
}

fn slice_range(desc: &SliceDesc, len: usize) -> Result<(usize, usize)> {
    match desc.step {
        None | Some(1) => (),
        _ => {
            return Err(ScriptError::value_error("slice step is not supported").into());
        }
    }
    let clamp = |i: i64| -> usize {
        if i < 0 {
            (len as i64 + i).max(0) as usize
        } else {
            (i as usize).min(len)
        }
    };
    let start = desc.start.map(clamp).unwrap_or(0);
    let stop = desc.stop.map(clamp).unwrap_or(len);
    Ok((start, stop.max(start)))
}

/// Human-readable form.
pub fn to_str(target: &Value) -> Result<String> {
    Ok(match target {
        Value::Str(s) => s.clone(),
        Value::Object(obj) => match obj.obj() {
            Obj::Exception(e) => e.message.clone(),
            _ => return to_repr(target),
        },
        Value::Proxy(p) => return p.str_value(),
        _ => return to_repr(target),
    })
}

/// Machine-readable form.
pub fn to_repr(target: &Value) -> Result<String> {
    Ok(match target {
        Value::Unit => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => fmt_float(*f),
        Value::Str(s) => repr_str(s),
        Value::Bytes(b) => repr_bytes(b),
        Value::Slice(desc) => format!(
            "slice({}, {}, {})",
            opt_int_repr(&desc.start),
            opt_int_repr(&desc.stop),
            opt_int_repr(&desc.step)
        ),
        Value::FrozenSet(items) => {
            if items.is_empty() {
                "frozenset()".to_string()
            } else {
                let parts: Vec<String> = items
                    .iter()
                    .map(|k| to_repr(&k.clone().into_value()))
                    .collect::<Result<_>>()?;
                format!("frozenset({{{}}})", parts.join(", "))
            }
        }
        Value::Tuple(items) => {
            let parts: Vec<String> = items.iter().map(to_repr).collect::<Result<_>>()?;
            if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            }
        }
        Value::Object(obj) => match obj.obj() {
            Obj::List(items) => {
                let items = items.lock().expect("BUG: list mutex poisoned").clone();
                let parts: Vec<String> = items.iter().map(to_repr).collect::<Result<_>>()?;
                format!("[{}]", parts.join(", "))
            }
            Obj::Dict(items) => {
                let items = items.lock().expect("BUG: dict mutex poisoned").clone();
                let mut parts = Vec::with_capacity(items.len());
                for (key, value) in &items {
                    parts.push(format!(
                        "{}: {}",
                        to_repr(&key.clone().into_value())?,
                        to_repr(value)?
                    ));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Obj::Set(items) => {
                let items = items.lock().expect("BUG: set mutex poisoned").clone();
                if items.is_empty() {
                    "set()".to_string()
                } else {
                    let parts: Vec<String> = items
                        .iter()
                        .map(|k| to_repr(&k.clone().into_value()))
                        .collect::<Result<_>>()?;
                    format!("{{{}}}", parts.join(", "))
                }
            }
            Obj::Module(m) => format!("<module '{}'>", m.name),
            Obj::Callable(f) => format!("<function {}>", f.name),
            Obj::Exception(e) => format!("{}({})", e.class_name, repr_str(&e.message)),
            Obj::Code(_) => "<code object>".to_string(),
            Obj::Iter(_) => "<iterator>".to_string(),
            Obj::Plain(_) => format!("<object at 0x{:x}>", obj.addr()),
        },
        Value::Proxy(p) => return p.repr_value(),
    })
}

fn opt_int_repr(v: &Option<i64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

fn fmt_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn repr_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn repr_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push_str("b'");
    for b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b if (0x20..0x7f).contains(b) => out.push(*b as char),
            b => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
    out
}

/// Attribute access on local containers resolves to bound methods; the
/// method closure captures the container and mutates it in place, so a
/// peer holding a proxy to the method mutates the origin container.
fn object_get_attr(obj: &ObjectRef, name: &str) -> Result<Value> {
    match obj.obj() {
        Obj::Module(m) => m
            .attrs
            .lock()
            .expect("BUG: module attrs mutex poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::attribute_error("module", name).into()),
        Obj::Plain(t) => t
            .attrs
            .lock()
            .expect("BUG: attr table mutex poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::attribute_error("object", name).into()),
        Obj::Exception(e) => match name {
            "class_name" => Ok(Value::Str(e.class_name.clone())),
            "message" => Ok(Value::Str(e.message.clone())),
            "traceback" => Ok(Value::Str(e.traceback.clone())),
            _ => e
                .attrs
                .lock()
                .expect("BUG: exception attrs mutex poisoned")
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptError::attribute_error("exception", name).into()),
        },
        Obj::Callable(f) => match name {
            "name" => Ok(Value::Str(f.name.clone())),
            _ => Err(ScriptError::attribute_error("function", name).into()),
        },
        Obj::List(_) => {
            list_method(obj, name).ok_or_else(|| ScriptError::attribute_error("list", name).into())
        }
        Obj::Dict(_) => {
            dict_method(obj, name).ok_or_else(|| ScriptError::attribute_error("dict", name).into())
        }
        Obj::Set(_) => {
            set_method(obj, name).ok_or_else(|| ScriptError::attribute_error("set", name).into())
        }
        _ => Err(ScriptError::attribute_error(obj.type_name(), name).into()),
    }
}

fn with_list<R>(obj: &ObjectRef, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
    match obj.obj() {
        Obj::List(items) => f(&mut items.lock().expect("BUG: list mutex poisoned")),
        _ => panic!("BUG: bound list method on non-list"),
    }
}

fn list_method(obj: &ObjectRef, name: &str) -> Option<Value> {
    let obj = obj.clone();
    Some(match name {
        "append" => Value::native("list.append", move |mut args, _| {
            let item = pop_front_arg(&mut args, "append")?;
            with_list(&obj, |items| items.push(item));
            Ok(Value::Unit)
        }),
        "pop" => Value::native("list.pop", move |args, _| {
            let index = match args.get(0) {
                Some(v) => v.as_int()?,
                None => -1,
            };
            with_list(&obj, |items| {
                let i = resolve_index(index, items.len())?;
                Ok(items.remove(i))
            })
        }),
        "insert" => Value::native("list.insert", move |mut args, _| {
            let index = pop_front_arg(&mut args, "insert")?.as_int()?;
            let item = pop_front_arg(&mut args, "insert")?;
            with_list(&obj, |items| {
                let i = if index < 0 {
                    (items.len() as i64 + index).max(0) as usize
                } else {
                    (index as usize).min(items.len())
                };
                items.insert(i, item);
            });
            Ok(Value::Unit)
        }),
        "remove" => Value::native("list.remove", move |mut args, _| {
            let item = pop_front_arg(&mut args, "remove")?;
            let snapshot = with_list(&obj, |items| items.clone());
            for (i, candidate) in snapshot.iter().enumerate() {
                if semantic_eq(candidate, &item)? {
                    with_list(&obj, |items| {
                        if i < items.len() {
                            items.remove(i);
                        }
                    });
                    return Ok(Value::Unit);
                }
            }
            Err(ScriptError::value_error("list.remove(x): x not in list").into())
        }),
        "extend" => Value::native("list.extend", move |mut args, _| {
            let other = pop_front_arg(&mut args, "extend")?;
            let iterator = iter_value(&other)?;
            let mut collected = Vec::new();
            loop {
                match op_next(&iterator) {
                    Ok(item) => collected.push(item),
                    Err(Error::Script(ref e)) if e.class_name == "StopIteration" => break,
                    Err(Error::Remote(ref e)) if e.matches("StopIteration") => break,
                    Err(e) => return Err(e),
                }
            }
            with_list(&obj, |items| items.extend(collected));
            Ok(Value::Unit)
        }),
        "index" => Value::native("list.index", move |mut args, _| {
            let item = pop_front_arg(&mut args, "index")?;
            let snapshot = with_list(&obj, |items| items.clone());
            for (i, candidate) in snapshot.iter().enumerate() {
                if semantic_eq(candidate, &item)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            Err(ScriptError::value_error("x not in list").into())
        }),
        "count" => Value::native("list.count", move |mut args, _| {
            let item = pop_front_arg(&mut args, "count")?;
            let snapshot = with_list(&obj, |items| items.clone());
            let mut count = 0i64;
            for candidate in &snapshot {
                if semantic_eq(candidate, &item)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }),
        "clear" => Value::native("list.clear", move |_, _| {
            with_list(&obj, |items| items.clear());
            Ok(Value::Unit)
        }),
        _ => return None,
    })
}

fn with_dict<R>(obj: &ObjectRef, f: impl FnOnce(&mut HashMap<DictKey, Value>) -> R) -> R {
    match obj.obj() {
        Obj::Dict(items) => f(&mut items.lock().expect("BUG: dict mutex poisoned")),
        _ => panic!("BUG: bound dict method on non-dict"),
    }
}

fn dict_method(obj: &ObjectRef, name: &str) -> Option<Value> {
    let obj = obj.clone();
    Some(match name {
        "get" => Value::native("dict.get", move |mut args, _| {
            let key = DictKey::try_from_value(&pop_front_arg(&mut args, "get")?)?;
            let default = args.pop().unwrap_or(Value::Unit);
            Ok(with_dict(&obj, |items| {
                items.get(&key).cloned().unwrap_or(default)
            }))
        }),
        "keys" => Value::native("dict.keys", move |_, _| {
            Ok(Value::new_list(with_dict(&obj, |items| {
                items.keys().map(|k| k.clone().into_value()).collect()
            })))
        }),
        "values" => Value::native("dict.values", move |_, _| {
            Ok(Value::new_list(with_dict(&obj, |items| {
                items.values().cloned().collect()
            })))
        }),
        "items" => Value::native("dict.items", move |_, _| {
            Ok(Value::new_list(with_dict(&obj, |items| {
                items
                    .iter()
                    .map(|(k, v)| Value::Tuple(vec![k.clone().into_value(), v.clone()]))
                    .collect()
            })))
        }),
        "update" => Value::native("dict.update", move |mut args, _| {
            let other = pop_front_arg(&mut args, "update")?;
            let iterator = iter_value(&other)?;
            // Accepts a dict (iterating keys) or an iterable of pairs
            let from_dict = matches!(&other, Value::Object(o) if matches!(o.obj(), Obj::Dict(_)));
            loop {
                let entry = match op_next(&iterator) {
                    Ok(item) => item,
                    Err(Error::Script(ref e)) if e.class_name == "StopIteration" => break,
                    Err(Error::Remote(ref e)) if e.matches("StopIteration") => break,
                    Err(e) => return Err(e),
                };
                let (key, value) = if from_dict {
                    let value = get_item(&other, &entry)?;
                    (DictKey::try_from_value(&entry)?, value)
                } else {
                    match entry {
                        Value::Tuple(mut pair) if pair.len() == 2 => {
                            let value = pair.pop().expect("BUG: checked pair length");
                            let key = pair.pop().expect("BUG: checked pair length");
                            (DictKey::try_from_value(&key)?, value)
                        }
                        other => {
                            return Err(ScriptError::type_error(format!(
                                "cannot convert dictionary update element '{}'",
                                other.type_name()
                            ))
                            .into());
                        }
                    }
                };
                with_dict(&obj, |items| items.insert(key, value));
            }
            Ok(Value::Unit)
        }),
        "pop" => Value::native("dict.pop", move |mut args, _| {
            let key = DictKey::try_from_value(&pop_front_arg(&mut args, "pop")?)?;
            let default = args.pop();
            with_dict(&obj, |items| match items.remove(&key) {
                Some(value) => Ok(value),
                None => {
                    default.ok_or_else(|| ScriptError::key_error(format!("{:?}", key)).into())
                }
            })
        }),
        "clear" => Value::native("dict.clear", move |_, _| {
            with_dict(&obj, |items| items.clear());
            Ok(Value::Unit)
        }),
        _ => return None,
    })
}

fn with_set<R>(
    obj: &ObjectRef,
    f: impl FnOnce(&mut std::collections::HashSet<DictKey>) -> R,
) -> R {
    match obj.obj() {
        Obj::Set(items) => f(&mut items.lock().expect("BUG: set mutex poisoned")),
        _ => panic!("BUG: bound set method on non-set"),
    }
}

fn set_method(obj: &ObjectRef, name: &str) -> Option<Value> {
    let obj = obj.clone();
    Some(match name {
        "add" => Value::native("set.add", move |mut args, _| {
            let key = DictKey::try_from_value(&pop_front_arg(&mut args, "add")?)?;
            with_set(&obj, |items| items.insert(key));
            Ok(Value::Unit)
        }),
        "remove" => Value::native("set.remove", move |mut args, _| {
            let key = DictKey::try_from_value(&pop_front_arg(&mut args, "remove")?)?;
            with_set(&obj, |items| {
                if items.remove(&key) {
                    Ok(Value::Unit)
                } else {
                    Err(ScriptError::key_error(format!("{:?}", key)).into())
                }
            })
        }),
        "discard" => Value::native("set.discard", move |mut args, _| {
            let key = DictKey::try_from_value(&pop_front_arg(&mut args, "discard")?)?;
            with_set(&obj, |items| items.remove(&key));
            Ok(Value::Unit)
        }),
        "clear" => Value::native("set.clear", move |_, _| {
            with_set(&obj, |items| items.clear());
            Ok(Value::Unit)
        }),
        _ => return None,
    })
}

fn pop_front_arg(args: &mut Vec<Value>, method: &str) -> Result<Value> {
    if args.is_empty() {
        return Err(ScriptError::type_error(format!("{}() is missing an argument", method)).into());
    }
    Ok(args.remove(0))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(
            bin_op(Kind::OpAdd, &Value::Int(1), &Value::Int(1)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            bin_op(Kind::OpFloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            bin_op(Kind::OpMod, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            bin_op(Kind::OpDiv, &Value::Int(7), &Value::Int(2)).unwrap(),
            Value::Float(3.5)
        );
        match bin_op(Kind::OpDiv, &Value::Int(1), &Value::Int(0)) {
            Err(Error::Script(e)) => assert_eq!(e.class_name, "ZeroDivisionError"),
            other => panic!("expected ZeroDivisionError, got {:?}", other),
        }
    }

    #[test]
    fn test_string_repeat() {
        assert_eq!(
            bin_op(Kind::OpMul, &Value::Str("hi".into()), &Value::Int(3)).unwrap(),
            Value::Str("hihihi".into())
        );
        assert_eq!(
            bin_op(Kind::OpMul, &Value::Str("hi".into()), &Value::Int(0)).unwrap(),
            Value::Str("".into())
        );
    }

    #[test]
    fn test_list_methods_mutate_in_place() {
        let list = Value::new_list(vec![Value::Int(1)]);
        let append = get_attr(&list, "append").unwrap();
        call(&append, vec![Value::Str("!".into())], vec![]).unwrap();
        assert_eq!(op_len(&list).unwrap(), 2);
        assert_eq!(
            get_item(&list, &Value::Int(-1)).unwrap(),
            Value::Str("!".into())
        );

        let pop = get_attr(&list, "pop").unwrap();
        assert_eq!(call(&pop, vec![], vec![]).unwrap(), Value::Str("!".into()));
        assert_eq!(op_len(&list).unwrap(), 1);
    }

    #[test]
    fn test_dict_roundtrip() {
        let dict = Value::new_dict();
        set_item(&dict, &Value::Str("k".into()), Value::Int(1)).unwrap();
        assert!(contains(&dict, &Value::Str("k".into())).unwrap());
        assert_eq!(
            get_item(&dict, &Value::Str("k".into())).unwrap(),
            Value::Int(1)
        );
        match get_item(&dict, &Value::Str("missing".into())) {
            Err(Error::Script(e)) => assert_eq!(e.class_name, "KeyError"),
            other => panic!("expected KeyError, got {:?}", other),
        }
    }

    #[test]
    fn test_iteration_protocol() {
        let it = iter_value(&Value::Tuple(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(op_next(&it).unwrap(), Value::Int(1));
        assert_eq!(op_next(&it).unwrap(), Value::Int(2));
        match op_next(&it) {
            Err(Error::Script(e)) => assert_eq!(e.class_name, "StopIteration"),
            other => panic!("expected StopIteration, got {:?}", other),
        }
    }

    #[test]
    fn test_str_and_repr() {
        assert_eq!(to_str(&Value::Str("hi".into())).unwrap(), "hi");
        assert_eq!(to_repr(&Value::Str("hi".into())).unwrap(), "'hi'");
        assert_eq!(to_str(&Value::Int(2)).unwrap(), "2");
        assert_eq!(to_str(&Value::Float(2.0)).unwrap(), "2.0");
        assert_eq!(to_str(&Value::Unit).unwrap(), "None");
        assert_eq!(to_str(&Value::Bool(true)).unwrap(), "True");
        let list = Value::new_list(vec![Value::Int(1), Value::Str("x".into())]);
        assert_eq!(to_repr(&list).unwrap(), "[1, 'x']");
        assert_eq!(
            to_repr(&Value::Tuple(vec![Value::Int(1)])).unwrap(),
            "(1,)"
        );
    }

    #[test]
    fn test_negative_indexing_and_slices() {
        let tuple = Value::Tuple(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert_eq!(get_item(&tuple, &Value::Int(-1)).unwrap(), Value::Int(30));
        let slice = Value::Slice(SliceDesc {
            start: Some(1),
            stop: None,
            step: None,
        });
        assert_eq!(
            get_item(&tuple, &slice).unwrap(),
            Value::Tuple(vec![Value::Int(20), Value::Int(30)])
        );
        match get_item(&tuple, &Value::Int(3)) {
            Err(Error::Script(e)) => assert_eq!(e.class_name, "IndexError"),
            other => panic!("expected IndexError, got {:?}", other),
        }
    }

    #[test]
    fn test_semantic_equality() {
        let a = Value::new_list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::new_list(vec![Value::Int(1), Value::Int(2)]);
        assert!(semantic_eq(&a, &b).unwrap());
        assert!(semantic_eq(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(!semantic_eq(&Value::Int(1), &Value::Str("1".into())).unwrap());
    }
}
