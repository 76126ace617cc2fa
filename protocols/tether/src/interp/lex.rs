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

//! Tokenizer for the evaluator's expression/statement language.

use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    True,
    False,
    None,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Newline,
}

pub fn tokenize(source: &str) -> Result<Vec<Tok>, ScriptError> {
    let mut out = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\r' => pos += 1,
            '#' => {
                while pos < chars.len() && chars[pos] != '\n' {
                    pos += 1;
                }
            }
            '\n' | ';' => {
                out.push(Tok::Newline);
                pos += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                pos += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                pos += 1;
            }
            '[' => {
                out.push(Tok::LBracket);
                pos += 1;
            }
            ']' => {
                out.push(Tok::RBracket);
                pos += 1;
            }
            ',' => {
                out.push(Tok::Comma);
                pos += 1;
            }
            '.' => {
                out.push(Tok::Dot);
                pos += 1;
            }
            ':' => {
                out.push(Tok::Colon);
                pos += 1;
            }
            '+' => {
                out.push(Tok::Plus);
                pos += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                pos += 1;
            }
            '*' => {
                out.push(Tok::Star);
                pos += 1;
            }
            '%' => {
                out.push(Tok::Percent);
                pos += 1;
            }
            '/' => {
                if chars.get(pos + 1) == Some(&'/') {
                    out.push(Tok::DoubleSlash);
                    pos += 2;
                } else {
                    out.push(Tok::Slash);
                    pos += 1;
                }
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Tok::EqEq);
                    pos += 2;
                } else {
                    out.push(Tok::Assign);
                    pos += 1;
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Tok::Ne);
                    pos += 2;
                } else {
                    return Err(ScriptError::syntax_error("unexpected '!'"));
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Tok::Le);
                    pos += 2;
                } else {
                    out.push(Tok::Lt);
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    out.push(Tok::Ge);
                    pos += 2;
                } else {
                    out.push(Tok::Gt);
                    pos += 1;
                }
            }
            '\'' | '"' => {
                let (tok, next) = lex_string(&chars, pos)?;
                out.push(tok);
                pos = next;
            }
            c if c.is_ascii_digit() => {
                let (tok, next) = lex_number(&chars, pos)?;
                out.push(tok);
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let name: String = chars[start..pos].iter().collect();
                out.push(match name.as_str() {
                    "True" => Tok::True,
                    "False" => Tok::False,
                    "None" => Tok::None,
                    _ => Tok::Name(name),
                });
            }
            other => {
                return Err(ScriptError::syntax_error(format!(
                    "unexpected character {:?}",
                    other
                )));
            }
        }
    }
    Ok(out)
}

fn lex_string(chars: &[char], start: usize) -> Result<(Tok, usize), ScriptError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut pos = start + 1;
    loop {
        match chars.get(pos).copied() {
            None | Some('\n') => {
                return Err(ScriptError::syntax_error("unterminated string literal"));
            }
            Some('\\') => {
                pos += 1;
                let escaped = chars
                    .get(pos)
                    .copied()
                    .ok_or_else(|| ScriptError::syntax_error("unterminated string literal"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    other => {
                        return Err(ScriptError::syntax_error(format!(
                            "unknown escape \\{}",
                            other
                        )));
                    }
                });
                pos += 1;
            }
            Some(c) if c == quote => return Ok((Tok::Str(out), pos + 1)),
            Some(c) => {
                out.push(c);
                pos += 1;
            }
        }
    }
}

fn lex_number(chars: &[char], start: usize) -> Result<(Tok, usize), ScriptError> {
    let mut pos = start;
    let mut is_float = false;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_ascii_digit() {
            pos += 1;
        } else if c == '.' && !is_float && chars.get(pos + 1).map_or(false, |c| c.is_ascii_digit())
        {
            is_float = true;
            pos += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..pos].iter().collect();
    if is_float {
        let value = text
            .parse::<f64>()
            .map_err(|_| ScriptError::syntax_error(format!("bad float literal '{}'", text)))?;
        Ok((Tok::Float(value), pos))
    } else {
        let value = text
            .parse::<i64>()
            .map_err(|_| ScriptError::syntax_error(format!("bad integer literal '{}'", text)))?;
        Ok((Tok::Int(value), pos))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tokenize_expression() {
        let toks = tokenize("1 + x.y(2, 'z')").expect("tokenize failed");
        assert_eq!(
            toks,
            vec![
                Tok::Int(1),
                Tok::Plus,
                Tok::Name("x".into()),
                Tok::Dot,
                Tok::Name("y".into()),
                Tok::LParen,
                Tok::Int(2),
                Tok::Comma,
                Tok::Str("z".into()),
                Tok::RParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            tokenize("a // b == c != d").unwrap(),
            vec![
                Tok::Name("a".into()),
                Tok::DoubleSlash,
                Tok::Name("b".into()),
                Tok::EqEq,
                Tok::Name("c".into()),
                Tok::Ne,
                Tok::Name("d".into()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokenize(r#""a\n\t\"b""#).unwrap(),
            vec![Tok::Str("a\n\t\"b".into())]
        );
        assert!(tokenize("'unterminated").is_err());
    }

    #[test]
    fn test_floats_vs_attribute_dots() {
        assert_eq!(tokenize("1.5").unwrap(), vec![Tok::Float(1.5)]);
        // A dot not followed by a digit terminates the number
        assert_eq!(
            tokenize("1.x").unwrap(),
            vec![Tok::Int(1), Tok::Dot, Tok::Name("x".into())]
        );
    }
}
