//! Tokenizer for runbook expressions.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    EqEq,
    NotEq,
    Le,
    Ge,
    Lt,
    Gt,
    AndAnd,
    OrOr,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "{s}"),
            Tok::Int(n) => write!(f, "{n}"),
            Tok::Float(n) => write!(f, "{n}"),
            Tok::Str(s) => write!(f, "{s:?}"),
            Tok::True => write!(f, "true"),
            Tok::False => write!(f, "false"),
            Tok::Null => write!(f, "null"),
            Tok::In => write!(f, "in"),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
            Tok::LBracket => write!(f, "["),
            Tok::RBracket => write!(f, "]"),
            Tok::Comma => write!(f, ","),
            Tok::Dot => write!(f, "."),
            Tok::EqEq => write!(f, "=="),
            Tok::NotEq => write!(f, "!="),
            Tok::Le => write!(f, "<="),
            Tok::Ge => write!(f, ">="),
            Tok::Lt => write!(f, "<"),
            Tok::Gt => write!(f, ">"),
            Tok::AndAnd => write!(f, "&&"),
            Tok::OrOr => write!(f, "||"),
            Tok::Not => write!(f, "!"),
            Tok::Plus => write!(f, "+"),
            Tok::Minus => write!(f, "-"),
            Tok::Star => write!(f, "*"),
            Tok::Slash => write!(f, "/"),
            Tok::Percent => write!(f, "%"),
        }
    }
}

pub fn lex(src: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '(' => toks.push(Tok::LParen),
            ')' => toks.push(Tok::RParen),
            '[' => toks.push(Tok::LBracket),
            ']' => toks.push(Tok::RBracket),
            ',' => toks.push(Tok::Comma),
            '.' => toks.push(Tok::Dot),
            '+' => toks.push(Tok::Plus),
            '-' => toks.push(Tok::Minus),
            '*' => toks.push(Tok::Star),
            '/' => toks.push(Tok::Slash),
            '%' => toks.push(Tok::Percent),
            '=' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    toks.push(Tok::EqEq);
                }
                _ => return Err(format!("unexpected '=' at {pos} (did you mean '==')")),
            },
            '!' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    toks.push(Tok::NotEq);
                }
                _ => toks.push(Tok::Not),
            },
            '<' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    toks.push(Tok::Le);
                }
                _ => toks.push(Tok::Lt),
            },
            '>' => match chars.peek() {
                Some((_, '=')) => {
                    chars.next();
                    toks.push(Tok::Ge);
                }
                _ => toks.push(Tok::Gt),
            },
            '&' => match chars.peek() {
                Some((_, '&')) => {
                    chars.next();
                    toks.push(Tok::AndAnd);
                }
                _ => return Err(format!("unexpected '&' at {pos} (did you mean '&&')")),
            },
            '|' => match chars.peek() {
                Some((_, '|')) => {
                    chars.next();
                    toks.push(Tok::OrOr);
                }
                _ => return Err(format!("unexpected '|' at {pos} (did you mean '||')")),
            },
            quote @ ('\'' | '"') => {
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, 'r')) => s.push('\r'),
                            Some((_, c)) => s.push(c),
                            None => return Err("unterminated escape in string".into()),
                        },
                        c => s.push(c),
                    }
                }
                if !closed {
                    return Err(format!("unterminated string starting at {pos}"));
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut num = String::from(c);
                let mut is_float = false;
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(*c);
                        chars.next();
                    } else if *c == '.' {
                        // A digit must follow, otherwise this dot is member
                        // access on an integer (not supported, so reject).
                        let mut ahead = chars.clone();
                        ahead.next();
                        match ahead.peek() {
                            Some((_, d)) if d.is_ascii_digit() => {
                                is_float = true;
                                num.push('.');
                                chars.next();
                            }
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    let f = num
                        .parse::<f64>()
                        .map_err(|e| format!("bad number {num}: {e}"))?;
                    toks.push(Tok::Float(f));
                } else {
                    let n = num
                        .parse::<i64>()
                        .map_err(|e| format!("bad number {num}: {e}"))?;
                    toks.push(Tok::Int(n));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, c)) = chars.peek() {
                    if c.is_alphanumeric() || *c == '_' {
                        ident.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(match ident.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" | "nil" => Tok::Null,
                    "in" => Tok::In,
                    _ => Tok::Ident(ident),
                });
            }
            c => return Err(format!("unexpected character {c:?} at {pos}")),
        }
    }

    Ok(toks)
}
