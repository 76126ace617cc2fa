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

//! Turns inbound request messages into local operations.
//!
//! The multiplexer hands every decoded request here; the kind selects the
//! handler. Errors are returned to the multiplexer, which marshals them
//! into Exception messages; they are never swallowed.

use std::sync::Arc;

use tether_logging::macros::*;

use crate::error::{Error, Result};
use crate::message::Kind;
use crate::mux::Connection;
use crate::ops;
use crate::value::Value;

pub(crate) fn dispatch(conn: &Arc<Connection>, kind: Kind, args: Value) -> Result<Value> {
    trace!("dispatching {:?}", kind);
    match kind {
        Kind::Evaluate => {
            let (source, globals, locals) = three(args)?;
            conn.interp().eval(&source, &globals, &locals)
        }
        Kind::GetAttr => {
            let (target, name) = two(args)?;
            let name = name.as_str()?;
            ops::get_attr(&target, name)
        }
        Kind::SetAttr => {
            let (target, name, value) = three(args)?;
            let name = name.as_str()?;
            ops::set_attr(&target, name, value.clone())?;
            Ok(Value::Unit)
        }
        Kind::GetStr => Ok(Value::Str(ops::to_str(&args)?)),
        Kind::GetRepr => Ok(Value::Str(ops::to_repr(&args)?)),
        kind if kind.is_operator() => {
            let (target, positional, keyword) = three(args)?;
            let positional = tuple_items(positional)?;
            let keyword = kwarg_items(keyword)?;
            ops::operator(kind, &target, positional, keyword)
        }
        other => Err(Error::protocol(format!(
            "unexpected request kind {:?}",
            other
        ))),
    }
}

fn two(args: Value) -> Result<(Value, Value)> {
    match args {
        Value::Tuple(mut items) if items.len() == 2 => {
            let b = items.pop().expect("BUG: checked tuple length");
            let a = items.pop().expect("BUG: checked tuple length");
            Ok((a, b))
        }
        other => Err(Error::protocol(format!(
            "malformed request payload: expected a pair, got '{}'",
            other.type_name()
        ))),
    }
}

fn three(args: Value) -> Result<(Value, Value, Value)> {
    match args {
        Value::Tuple(mut items) if items.len() == 3 => {
            let c = items.pop().expect("BUG: checked tuple length");
            let b = items.pop().expect("BUG: checked tuple length");
            let a = items.pop().expect("BUG: checked tuple length");
            Ok((a, b, c))
        }
        other => Err(Error::protocol(format!(
            "malformed request payload: expected a triple, got '{}'",
            other.type_name()
        ))),
    }
}

fn tuple_items(args: Value) -> Result<Vec<Value>> {
    match args {
        Value::Tuple(items) => Ok(items),
        Value::Unit => Ok(Vec::new()),
        other => Err(Error::protocol(format!(
            "malformed argument list: '{}'",
            other.type_name()
        ))),
    }
}

fn kwarg_items(args: Value) -> Result<Vec<(String, Value)>> {
    let pairs = tuple_items(args)?;
    let mut out = Vec::with_capacity(pairs.len());
    for pair in pairs {
        match pair {
            Value::Tuple(mut kv) if kv.len() == 2 => {
                let value = kv.pop().expect("BUG: checked pair length");
                let key = kv.pop().expect("BUG: checked pair length");
                match key {
                    Value::Str(name) => out.push((name, value)),
                    other => {
                        return Err(Error::protocol(format!(
                            "keyword name is not a string: '{}'",
                            other.type_name()
                        )));
                    }
                }
            }
            other => {
                return Err(Error::protocol(format!(
                    "malformed keyword argument: '{}'",
                    other.type_name()
                )));
            }
        }
    }
    Ok(out)
}
