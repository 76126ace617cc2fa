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

//! Recursive-descent parser for the evaluator's language.
//!
//! Grammar, roughly:
//!
//! ```text
//! program(exec) := stmt (NEWLINE stmt)*
//! stmt          := target '=' tuple_expr | tuple_expr
//! tuple_expr    := expr (',' expr)* [',']
//! expr          := arith ((== != < <= > >=) arith)?
//! arith         := term ((+|-) term)*
//! term          := factor ((*|/|//|%) factor)*
//! factor        := '-' factor | postfix
//! postfix       := atom ('.' NAME | '(' args ')' | '[' subscript ']')*
//! atom          := literal | NAME | '(' tuple_expr ')' | '[' exprs ']'
//! ```

use super::lex::{tokenize, Tok};
use super::{BinOp, Expr, Mode, Program, Stmt, Target};
use crate::error::ScriptError;

pub fn parse(source: &str, mode: Mode) -> Result<Program, ScriptError> {
    let toks = tokenize(source)?;
    let mut parser = Parser { toks, pos: 0 };
    match mode {
        Mode::Eval => {
            parser.skip_newlines();
            let expr = parser.tuple_expr()?;
            parser.skip_newlines();
            parser.expect_end()?;
            Ok(Program {
                mode,
                stmts: vec![Stmt::Expr(expr)],
            })
        }
        Mode::Exec => {
            let mut stmts = Vec::new();
            parser.skip_newlines();
            while !parser.at_end() {
                stmts.push(parser.stmt()?);
                if !parser.at_end() {
                    parser.expect_newline()?;
                    parser.skip_newlines();
                }
            }
            Ok(Program { mode, stmts })
        }
    }
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), ScriptError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(ScriptError::syntax_error(format!(
                "expected {:?}, found {:?}",
                tok,
                self.peek()
            )))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn expect_end(&self) -> Result<(), ScriptError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(ScriptError::syntax_error(format!(
                "unexpected trailing {:?}",
                self.peek()
            )))
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Tok::Newline) {}
    }

    fn expect_newline(&mut self) -> Result<(), ScriptError> {
        self.expect(&Tok::Newline)
    }

    fn stmt(&mut self) -> Result<Stmt, ScriptError> {
        let expr = self.tuple_expr()?;
        if self.eat(&Tok::Assign) {
            let value = self.tuple_expr()?;
            let target = match expr {
                Expr::Name(name) => Target::Name(name),
                Expr::Attr(obj, name) => Target::Attr(*obj, name),
                Expr::Index { target, index } => Target::Index(*target, *index),
                other => {
                    return Err(ScriptError::syntax_error(format!(
                        "cannot assign to {:?}",
                        other
                    )));
                }
            };
            Ok(Stmt::Assign { target, value })
        } else {
            Ok(Stmt::Expr(expr))
        }
    }

    fn tuple_expr(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expr()?;
        if self.peek() != Some(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            // Trailing comma closes the tuple
            match self.peek() {
                None
                | Some(Tok::Newline)
                | Some(Tok::RParen)
                | Some(Tok::RBracket)
                | Some(Tok::Assign) => break,
                _ => items.push(self.expr()?),
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        let lhs = self.arith()?;
        let op = match self.peek() {
            Some(Tok::EqEq) => BinOp::Eq,
            Some(Tok::Ne) => BinOp::Ne,
            Some(Tok::Lt) => BinOp::Lt,
            Some(Tok::Le) => BinOp::Le,
            Some(Tok::Gt) => BinOp::Gt,
            Some(Tok::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.arith()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn arith(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::DoubleSlash) => BinOp::FloorDiv,
                Some(Tok::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        if self.eat(&Tok::Minus) {
            let inner = self.factor()?;
            // Fold literal negation so "-9223372036854775808" parses
            return Ok(match inner {
                Expr::Int(i) => Expr::Int(i.wrapping_neg()),
                Expr::Float(f) => Expr::Float(-f),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&Tok::Dot) {
                let name = self.name()?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&Tok::LParen) {
                let (args, kwargs) = self.arglist()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat(&Tok::LBracket) {
                expr = self.subscript(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, ScriptError> {
        // "[:...]" or "[expr...]", optionally sliced with ':'
        let start = if self.peek() == Some(&Tok::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if self.eat(&Tok::Colon) {
            let stop = if self.peek() == Some(&Tok::RBracket) {
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            self.expect(&Tok::RBracket)?;
            Ok(Expr::Slice {
                target: Box::new(target),
                start,
                stop,
            })
        } else {
            self.expect(&Tok::RBracket)?;
            let index =
                start.ok_or_else(|| ScriptError::syntax_error("empty subscript"))?;
            Ok(Expr::Index {
                target: Box::new(target),
                index,
            })
        }
    }

    fn arglist(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ScriptError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // A "name =" prefix denotes a keyword argument
            let is_kwarg = matches!(
                (self.peek(), self.toks.get(self.pos + 1)),
                (Some(Tok::Name(_)), Some(Tok::Assign))
            );
            if is_kwarg {
                let name = self.name()?;
                self.expect(&Tok::Assign)?;
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(ScriptError::syntax_error(
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.expr()?);
            }
            if self.eat(&Tok::RParen) {
                return Ok((args, kwargs));
            }
            self.expect(&Tok::Comma)?;
        }
    }

    fn name(&mut self) -> Result<String, ScriptError> {
        match self.next() {
            Some(Tok::Name(name)) => Ok(name),
            other => Err(ScriptError::syntax_error(format!(
                "expected a name, found {:?}",
                other
            ))),
        }
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        match self.next() {
            Some(Tok::Int(i)) => Ok(Expr::Int(i)),
            Some(Tok::Float(f)) => Ok(Expr::Float(f)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::True) => Ok(Expr::Bool(true)),
            Some(Tok::False) => Ok(Expr::Bool(false)),
            Some(Tok::None) => Ok(Expr::None),
            Some(Tok::Name(name)) => Ok(Expr::Name(name)),
            Some(Tok::LParen) => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple(vec![]));
                }
                let inner = self.tuple_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.eat(&Tok::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.expr()?);
                    if self.eat(&Tok::RBracket) {
                        return Ok(Expr::List(items));
                    }
                    self.expect(&Tok::Comma)?;
                    // Trailing comma
                    if self.eat(&Tok::RBracket) {
                        return Ok(Expr::List(items));
                    }
                }
            }
            other => Err(ScriptError::syntax_error(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_eval(source: &str) -> Expr {
        let program = parse(source, Mode::Eval).expect("parse failed");
        match program.stmts.into_iter().next() {
            Some(Stmt::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        match parse_eval("1 + 2 * 3") {
            Expr::Binary { op: BinOp::Add, rhs, .. } => match *rhs {
                Expr::Binary { op: BinOp::Mul, .. } => (),
                other => panic!("rhs is not a product: {:?}", other),
            },
            other => panic!("not a sum: {:?}", other),
        }
    }

    #[test]
    fn test_postfix_chain() {
        match parse_eval("a.b(1)[2]") {
            Expr::Index { target, .. } => match *target {
                Expr::Call { func, .. } => match *func {
                    Expr::Attr(_, name) => assert_eq!(name, "b"),
                    other => panic!("not an attribute: {:?}", other),
                },
                other => panic!("not a call: {:?}", other),
            },
            other => panic!("not an index: {:?}", other),
        }
    }

    #[test]
    fn test_kwargs() {
        match parse_eval("f(1, x=2)") {
            Expr::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs.len(), 1);
                assert_eq!(kwargs[0].0, "x");
            }
            other => panic!("not a call: {:?}", other),
        }
        assert!(parse("f(x=1, 2)", Mode::Eval).is_err());
    }

    #[test]
    fn test_exec_statements() {
        let program = parse("x = 1\ny = x + 1\n", Mode::Exec).expect("parse failed");
        assert_eq!(program.stmts.len(), 2);
        match &program.stmts[0] {
            Stmt::Assign {
                target: Target::Name(name),
                ..
            } => assert_eq!(name, "x"),
            other => panic!("not an assignment: {:?}", other),
        }
    }

    #[test]
    fn test_slices_and_negatives() {
        match parse_eval("xs[1:3]") {
            Expr::Slice { start, stop, .. } => {
                assert!(start.is_some());
                assert!(stop.is_some());
            }
            other => panic!("not a slice: {:?}", other),
        }
        match parse_eval("xs[-1]") {
            Expr::Index { index, .. } => match *index {
                Expr::Int(-1) => (),
                other => panic!("index not folded: {:?}", other),
            },
            other => panic!("not an index: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("1 +", Mode::Eval).is_err());
        assert!(parse("(1", Mode::Eval).is_err());
        assert!(parse("1 = 2", Mode::Exec).is_err());
        assert!(parse("", Mode::Eval).is_err());
    }
}
