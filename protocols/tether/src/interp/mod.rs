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

//! The local interpreter surface.
//!
//! Each connection owns one `Interp`: a registry of builtin modules plus
//! a connection-global namespace, and an evaluator for the small
//! expression/statement language the Evaluate operation accepts.
//!
//! Name resolution and every operation inside the evaluator go through
//! [`crate::ops`], so an environment mapping supplied by the peer (which
//! arrives as a dict proxy) transparently turns name lookups and stores
//! into nested calls back into the requester.

mod builtins;
mod lex;
mod parse;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, ScriptError};
use crate::message::Kind;
use crate::ops;
use crate::value::{Obj, Value};

/// What a compiled program evaluates to: a single expression's value, or
/// a statement sequence run for its effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Eval,
    Exec,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub mode: Mode,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign { target: Target, value: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Attr(Expr, String),
    Index(Expr, Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Attr(Box<Expr>, String),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    fn kind(self) -> Kind {
        match self {
            BinOp::Add => Kind::OpAdd,
            BinOp::Sub => Kind::OpSub,
            BinOp::Mul => Kind::OpMul,
            BinOp::Div => Kind::OpDiv,
            BinOp::FloorDiv => Kind::OpFloorDiv,
            BinOp::Mod => Kind::OpMod,
            BinOp::Eq => Kind::OpEq,
            BinOp::Ne => Kind::OpNe,
            BinOp::Lt => Kind::OpLt,
            BinOp::Le => Kind::OpLe,
            BinOp::Gt => Kind::OpGt,
            BinOp::Ge => Kind::OpGe,
        }
    }
}

pub struct Interp {
    /// name -> module object
    modules: Arc<Mutex<HashMap<String, Value>>>,
    /// The `builtins` module; terminal scope of every name lookup
    builtins: Value,
    /// Connection-global namespace used when the requester passes no
    /// globals mapping
    root: Value,
}

impl Interp {
    pub fn new() -> Interp {
        let modules = Arc::new(Mutex::new(HashMap::new()));
        let builtins = builtins::install(&modules);
        Interp {
            modules,
            builtins,
            root: Value::new_dict(),
        }
    }

    /// Resolve a (possibly dotted) module name.
    pub fn import(&self, name: &str) -> Result<Value> {
        let mut parts = name.split('.');
        let head = parts.next().expect("BUG: split yields at least one part");
        let mut value = self
            .modules
            .lock()
            .expect("BUG: module registry mutex poisoned")
            .get(head)
            .cloned()
            .ok_or_else(|| ScriptError::import_error(head))?;
        for part in parts {
            value = ops::get_attr(&value, part)
                .map_err(|_| ScriptError::import_error(name))?;
        }
        Ok(value)
    }

    /// Compile source text into a program.
    pub fn compile(source: &str, mode: Mode) -> std::result::Result<Program, ScriptError> {
        parse::parse(source, mode)
    }

    /// The Evaluate operation: `source` is either source text (compiled
    /// in Eval mode) or a code object produced by `compile`. `globals`
    /// and `locals` are optional mappings, either side's.
    pub fn eval(&self, source: &Value, globals: &Value, locals: &Value) -> Result<Value> {
        let program = match source {
            Value::Str(text) => Self::compile(text, Mode::Eval)?,
            Value::Object(obj) => match obj.obj() {
                Obj::Code(code) => code.program.clone(),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "eval() arg must be a string or code object, not '{}'",
                        obj.type_name()
                    ))
                    .into());
                }
            },
            other => {
                return Err(ScriptError::type_error(format!(
                    "eval() arg must be a string or code object, not '{}'",
                    other.type_name()
                ))
                .into());
            }
        };
        let env = Env {
            interp: self,
            globals: namespace(globals),
            locals: namespace(locals),
        };
        run(&program, &env)
    }

    fn builtin_attr(&self, name: &str) -> Option<Value> {
        ops::get_attr(&self.builtins, name).ok()
    }
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

fn namespace(value: &Value) -> Option<&Value> {
    if value.is_unit() {
        None
    } else {
        Some(value)
    }
}

/// Scope chain of one evaluation: locals, then globals, then the
/// connection-global namespace, then builtins.
struct Env<'a> {
    interp: &'a Interp,
    globals: Option<&'a Value>,
    locals: Option<&'a Value>,
}

impl<'a> Env<'a> {
    fn load(&self, name: &str) -> Result<Value> {
        let key = Value::Str(name.to_string());
        for ns in [self.locals, self.globals].iter().copied().flatten() {
            if ops::contains(ns, &key)? {
                return ops::get_item(ns, &key);
            }
        }
        if ops::contains(&self.interp.root, &key)? {
            return ops::get_item(&self.interp.root, &key);
        }
        if let Some(value) = self.interp.builtin_attr(name) {
            return Ok(value);
        }
        Err(ScriptError::name_error(name).into())
    }

    fn store(&self, name: &str, value: Value) -> Result<()> {
        let key = Value::Str(name.to_string());
        let ns = self
            .locals
            .or(self.globals)
            .unwrap_or(&self.interp.root);
        ops::set_item(ns, &key, value)
    }
}

fn run(program: &Program, env: &Env) -> Result<Value> {
    match program.mode {
        Mode::Eval => match program.stmts.first() {
            Some(Stmt::Expr(expr)) => eval_expr(env, expr),
            _ => Err(ScriptError::syntax_error("eval program must be a single expression").into()),
        },
        Mode::Exec => {
            for stmt in &program.stmts {
                exec_stmt(env, stmt)?;
            }
            Ok(Value::Unit)
        }
    }
}

fn exec_stmt(env: &Env, stmt: &Stmt) -> Result<()> {
    match stmt {
        Stmt::Expr(expr) => {
            eval_expr(env, expr)?;
            Ok(())
        }
        Stmt::Assign { target, value } => {
            let value = eval_expr(env, value)?;
            match target {
                Target::Name(name) => env.store(name, value),
                Target::Attr(obj, name) => {
                    let obj = eval_expr(env, obj)?;
                    ops::set_attr(&obj, name, value)
                }
                Target::Index(obj, index) => {
                    let obj = eval_expr(env, obj)?;
                    let index = eval_expr(env, index)?;
                    ops::set_item(&obj, &index, value)
                }
            }
        }
    }
}

fn eval_expr(env: &Env, expr: &Expr) -> Result<Value> {
    Ok(match expr {
        Expr::Int(i) => Value::Int(*i),
        Expr::Float(f) => Value::Float(*f),
        Expr::Str(s) => Value::Str(s.clone()),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::None => Value::Unit,
        Expr::Name(name) => env.load(name)?,
        Expr::Tuple(items) => Value::Tuple(
            items
                .iter()
                .map(|item| eval_expr(env, item))
                .collect::<Result<_>>()?,
        ),
        Expr::List(items) => Value::new_list(
            items
                .iter()
                .map(|item| eval_expr(env, item))
                .collect::<Result<_>>()?,
        ),
        Expr::Attr(obj, name) => {
            let obj = eval_expr(env, obj)?;
            ops::get_attr(&obj, name)?
        }
        Expr::Call { func, args, kwargs } => {
            let func = eval_expr(env, func)?;
            let args = args
                .iter()
                .map(|arg| eval_expr(env, arg))
                .collect::<Result<Vec<_>>>()?;
            let kwargs = kwargs
                .iter()
                .map(|(name, value)| Ok((name.clone(), eval_expr(env, value)?)))
                .collect::<Result<Vec<_>>>()?;
            ops::call(&func, args, kwargs)?
        }
        Expr::Index { target, index } => {
            let target = eval_expr(env, target)?;
            let index = eval_expr(env, index)?;
            ops::get_item(&target, &index)?
        }
        Expr::Slice {
            target,
            start,
            stop,
        } => {
            let target = eval_expr(env, target)?;
            let start = eval_opt_bound(env, start)?;
            let stop = eval_opt_bound(env, stop)?;
            ops::get_item(
                &target,
                &Value::Slice(crate::value::SliceDesc {
                    start,
                    stop,
                    step: None,
                }),
            )?
        }
        Expr::Neg(inner) => {
            let inner = eval_expr(env, inner)?;
            ops::neg(&inner)?
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_expr(env, lhs)?;
            let rhs = eval_expr(env, rhs)?;
            ops::bin_op(op.kind(), &lhs, &rhs)?
        }
    })
}

fn eval_opt_bound(env: &Env, bound: &Option<Box<Expr>>) -> Result<Option<i64>> {
    match bound {
        Some(expr) => Ok(Some(eval_expr(env, expr)?.as_int()?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn eval(interp: &Interp, source: &str) -> Result<Value> {
        interp.eval(
            &Value::Str(source.to_string()),
            &Value::Unit,
            &Value::Unit,
        )
    }

    #[test]
    fn test_echo_expressions() {
        let interp = Interp::new();
        assert_eq!(eval(&interp, "1+1").unwrap(), Value::Int(2));
        assert_eq!(
            eval(&interp, "'hi'*3").unwrap(),
            Value::Str("hihihi".into())
        );
        assert_eq!(eval(&interp, "2 * (3 + 4)").unwrap(), Value::Int(14));
        assert_eq!(eval(&interp, "-3 + 1").unwrap(), Value::Int(-2));
        assert_eq!(eval(&interp, "7 // 2").unwrap(), Value::Int(3));
        assert_eq!(eval(&interp, "1 < 2").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_builtin_calls() {
        let interp = Interp::new();
        assert_eq!(eval(&interp, "len('abc')").unwrap(), Value::Int(3));
        assert_eq!(
            eval(&interp, "str(42)").unwrap(),
            Value::Str("42".to_string())
        );
        assert_eq!(eval(&interp, "abs(-3)").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_name_errors() {
        let interp = Interp::new();
        match eval(&interp, "unknown_name") {
            Err(crate::Error::Script(e)) => assert_eq!(e.class_name, "NameError"),
            other => panic!("expected NameError, got {:?}", other),
        }
    }

    #[test]
    fn test_import_and_attribute_chain() {
        let interp = Interp::new();
        let pid = eval(&interp, "import_module('os').getpid()").unwrap();
        assert_eq!(pid, Value::Int(std::process::id() as i64));
    }

    #[test]
    fn test_locals_scope_and_assignment() {
        let interp = Interp::new();
        let locals = Value::new_dict();
        interp
            .eval(
                &{
                    let program =
                        Interp::compile("x = 2\ny = x * 21", Mode::Exec).expect("compile failed");
                    Value::new_code(program)
                },
                &Value::Unit,
                &locals,
            )
            .expect("exec failed");
        assert_eq!(
            ops::get_item(&locals, &Value::Str("y".into())).unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn test_root_namespace_persists_across_evals() {
        let interp = Interp::new();
        let program = Interp::compile("counter = 41", Mode::Exec).expect("compile failed");
        interp
            .eval(&Value::new_code(program), &Value::Unit, &Value::Unit)
            .expect("exec failed");
        assert_eq!(eval(&interp, "counter + 1").unwrap(), Value::Int(42));
    }

    #[test]
    fn test_tuples_lists_and_indexing() {
        let interp = Interp::new();
        assert_eq!(
            eval(&interp, "(1, 2, 3)[-1]").unwrap(),
            Value::Int(3)
        );
        assert_eq!(eval(&interp, "[10, 20, 30][1]").unwrap(), Value::Int(20));
        assert_eq!(
            eval(&interp, "'abcdef'[1:3]").unwrap(),
            Value::Str("bc".into())
        );
        assert_eq!(
            eval(&interp, "(1, 'two')").unwrap(),
            Value::Tuple(vec![Value::Int(1), Value::Str("two".into())])
        );
    }

    #[test]
    fn test_exception_classes_surface() {
        let interp = Interp::new();
        match eval(&interp, "1/0") {
            Err(crate::Error::Script(e)) => assert_eq!(e.class_name, "ZeroDivisionError"),
            other => panic!("expected ZeroDivisionError, got {:?}", other),
        }
        match eval(&interp, "import_module('no_such_module')") {
            Err(crate::Error::Script(e)) => assert_eq!(e.class_name, "ImportError"),
            other => panic!("expected ImportError, got {:?}", other),
        }
    }
}
