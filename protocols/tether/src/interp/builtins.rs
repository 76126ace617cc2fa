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

//! Builtin modules of the interpreter surface.
//!
//! `builtins` is the terminal scope of every name lookup; the other
//! modules are reachable through `import_module` (and therefore through a
//! connection's auto-importer).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result, ScriptError};
use crate::interp::{Interp, Mode};
use crate::ops;
use crate::value::Value;

type Registry = Arc<Mutex<HashMap<String, Value>>>;

/// Build every builtin module into `registry` and return the `builtins`
/// module object.
pub fn install(registry: &Registry) -> Value {
    let builtins = make_builtins(registry);
    let mut modules = registry
        .lock()
        .expect("BUG: module registry mutex poisoned");
    modules.insert("builtins".to_string(), builtins.clone());
    modules.insert("os".to_string(), make_os());
    modules.insert("sys".to_string(), make_sys());
    modules.insert("math".to_string(), make_math());
    modules.insert("time".to_string(), make_time());
    modules.insert("fs".to_string(), make_fs());
    builtins
}

fn arg(args: &[Value], index: usize, name: &str) -> Result<Value> {
    args.get(index).cloned().ok_or_else(|| {
        ScriptError::type_error(format!("{}() is missing argument {}", name, index + 1)).into()
    })
}

fn make_builtins(registry: &Registry) -> Value {
    let registry = registry.clone();
    Value::new_module(
        "builtins",
        vec![
            (
                "len",
                Value::native("len", |args, _| {
                    Ok(Value::Int(ops::op_len(&arg(&args, 0, "len")?)? as i64))
                }),
            ),
            (
                "str",
                Value::native("str", |args, _| {
                    Ok(Value::Str(ops::to_str(&arg(&args, 0, "str")?)?))
                }),
            ),
            (
                "repr",
                Value::native("repr", |args, _| {
                    Ok(Value::Str(ops::to_repr(&arg(&args, 0, "repr")?)?))
                }),
            ),
            (
                "abs",
                Value::native("abs", |args, _| match arg(&args, 0, "abs")? {
                    Value::Int(i) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| ScriptError::value_error("integer overflow").into()),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(ScriptError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))
                    .into()),
                }),
            ),
            ("min", Value::native("min", |args, _| extremum(args, true))),
            ("max", Value::native("max", |args, _| extremum(args, false))),
            (
                "compile",
                Value::native("compile", |args, _| {
                    let source = arg(&args, 0, "compile")?;
                    let source = source.as_str()?;
                    let mode = match args.get(1) {
                        Some(v) => v.as_str()?.to_string(),
                        None => "exec".to_string(),
                    };
                    let mode = match mode.as_str() {
                        "eval" => Mode::Eval,
                        "exec" => Mode::Exec,
                        other => {
                            return Err(ScriptError::value_error(format!(
                                "compile() mode must be 'exec' or 'eval', not '{}'",
                                other
                            ))
                            .into());
                        }
                    };
                    Ok(Value::new_code(Interp::compile(source, mode)?))
                }),
            ),
            (
                "import_module",
                Value::native("import_module", move |args, _| {
                    let name = arg(&args, 0, "import_module")?;
                    let name = name.as_str()?;
                    import_from(&registry, name)
                }),
            ),
        ],
    )
}

fn import_from(registry: &Registry, name: &str) -> Result<Value> {
    let mut parts = name.split('.');
    let head = parts.next().expect("BUG: split yields at least one part");
    let mut value = registry
        .lock()
        .expect("BUG: module registry mutex poisoned")
        .get(head)
        .cloned()
        .ok_or_else(|| ScriptError::import_error(head))?;
    for part in parts {
        value = ops::get_attr(&value, part).map_err(|_| ScriptError::import_error(name))?;
    }
    Ok(value)
}

fn extremum(args: Vec<Value>, minimum: bool) -> Result<Value> {
    let candidates: Vec<Value> = if args.len() == 1 {
        let iterator = ops::iter_value(&args[0])?;
        let mut out = Vec::new();
        loop {
            match ops::op_next(&iterator) {
                Ok(item) => out.push(item),
                Err(Error::Script(ref e)) if e.class_name == "StopIteration" => break,
                Err(Error::Remote(ref e)) if e.matches("StopIteration") => break,
                Err(e) => return Err(e),
            }
        }
        out
    } else {
        args
    };
    let name = if minimum { "min" } else { "max" };
    let mut best = candidates
        .first()
        .cloned()
        .ok_or_else(|| -> Error {
            ScriptError::value_error(format!("{}() arg is an empty sequence", name)).into()
        })?;
    for candidate in candidates.into_iter().skip(1) {
        let less = ops::truthy(&ops::bin_op(
            crate::message::Kind::OpLt,
            &candidate,
            &best,
        )?)?;
        if less == minimum {
            best = candidate;
        }
    }
    Ok(best)
}

fn make_os() -> Value {
    Value::new_module(
        "os",
        vec![
            (
                "getpid",
                Value::native("getpid", |_, _| {
                    Ok(Value::Int(std::process::id() as i64))
                }),
            ),
            (
                "getcwd",
                Value::native("getcwd", |_, _| {
                    let cwd = std::env::current_dir().map_err(Error::Io)?;
                    Ok(Value::Str(cwd.to_string_lossy().into_owned()))
                }),
            ),
            (
                "name",
                Value::Str(if cfg!(windows) { "nt" } else { "posix" }.to_string()),
            ),
        ],
    )
}

fn make_sys() -> Value {
    Value::new_module(
        "sys",
        vec![
            ("path", Value::new_list(vec![Value::Str(String::new())])),
            (
                "platform",
                Value::Str(std::env::consts::OS.to_string()),
            ),
            (
                "version",
                Value::Str(format!("tether {}", env!("CARGO_PKG_VERSION"))),
            ),
        ],
    )
}

fn make_math() -> Value {
    Value::new_module(
        "math",
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            (
                "sqrt",
                Value::native("sqrt", |args, _| {
                    let x = arg(&args, 0, "sqrt")?.as_f64()?;
                    if x < 0.0 {
                        return Err(ScriptError::value_error("math domain error").into());
                    }
                    Ok(Value::Float(x.sqrt()))
                }),
            ),
            (
                "floor",
                Value::native("floor", |args, _| {
                    Ok(Value::Int(arg(&args, 0, "floor")?.as_f64()?.floor() as i64))
                }),
            ),
            (
                "ceil",
                Value::native("ceil", |args, _| {
                    Ok(Value::Int(arg(&args, 0, "ceil")?.as_f64()?.ceil() as i64))
                }),
            ),
            (
                "pow",
                Value::native("pow", |args, _| {
                    let base = arg(&args, 0, "pow")?.as_f64()?;
                    let exp = arg(&args, 1, "pow")?.as_f64()?;
                    Ok(Value::Float(base.powf(exp)))
                }),
            ),
        ],
    )
}

fn make_time() -> Value {
    Value::new_module(
        "time",
        vec![
            (
                "time",
                Value::native("time", |_, _| {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map_err(|_| ScriptError::runtime_error("clock before epoch"))?;
                    Ok(Value::Float(now.as_secs_f64()))
                }),
            ),
            (
                "sleep",
                Value::native("sleep", |args, _| {
                    let seconds = arg(&args, 0, "sleep")?.as_f64()?;
                    if !seconds.is_finite() || seconds < 0.0 {
                        return Err(
                            ScriptError::value_error("sleep length must be non-negative").into()
                        );
                    }
                    std::thread::sleep(Duration::from_secs_f64(seconds));
                    Ok(Value::Unit)
                }),
            ),
        ],
    )
}

fn make_fs() -> Value {
    Value::new_module(
        "fs",
        vec![
            (
                "read_bytes",
                Value::native("read_bytes", |args, _| {
                    let path = arg(&args, 0, "read_bytes")?;
                    Ok(Value::Bytes(std::fs::read(path.as_str()?).map_err(Error::Io)?))
                }),
            ),
            (
                "write_bytes",
                Value::native("write_bytes", |args, _| {
                    let path = arg(&args, 0, "write_bytes")?;
                    let data = match arg(&args, 1, "write_bytes")? {
                        Value::Bytes(b) => b,
                        Value::Str(s) => s.into_bytes(),
                        other => {
                            return Err(ScriptError::type_error(format!(
                                "write_bytes() expects bytes, got '{}'",
                                other.type_name()
                            ))
                            .into());
                        }
                    };
                    std::fs::write(path.as_str()?, data).map_err(Error::Io)?;
                    Ok(Value::Unit)
                }),
            ),
            (
                "exists",
                Value::native("exists", |args, _| {
                    let path = arg(&args, 0, "exists")?;
                    Ok(Value::Bool(std::path::Path::new(path.as_str()?).exists()))
                }),
            ),
        ],
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn interp_eval(source: &str) -> Result<Value> {
        let interp = Interp::new();
        interp.eval(
            &Value::Str(source.to_string()),
            &Value::Unit,
            &Value::Unit,
        )
    }

    #[test]
    fn test_min_max() {
        assert_eq!(interp_eval("min(3, 1, 2)").unwrap(), Value::Int(1));
        assert_eq!(interp_eval("max([3, 1, 2])").unwrap(), Value::Int(3));
        assert!(interp_eval("min([])").is_err());
    }

    #[test]
    fn test_compile_modes() {
        assert!(interp_eval("compile('1+1', 'eval')").is_ok());
        assert!(interp_eval("compile('x = 1')").is_ok());
        match interp_eval("compile('1+1', 'single')") {
            Err(Error::Script(e)) => assert_eq!(e.class_name, "ValueError"),
            other => panic!("expected ValueError, got {:?}", other),
        }
    }

    #[test]
    fn test_sys_module_shape() {
        let interp = Interp::new();
        let sys = interp.import("sys").expect("sys must exist");
        let path = ops::get_attr(&sys, "path").expect("sys.path must exist");
        assert!(ops::op_len(&path).unwrap() >= 1);
    }

    #[test]
    fn test_import_module_dotted_failure() {
        match interp_eval("import_module('os.no_such_attr')") {
            Err(Error::Script(e)) => assert_eq!(e.class_name, "ImportError"),
            other => panic!("expected ImportError, got {:?}", other),
        }
    }
}
