//! Pratt parser for runbook expressions.

use super::lexer::{lex, Tok};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Array(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn binding_power(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::In => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 6,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

pub fn parse(src: &str) -> Result<Expr, String> {
    let toks = lex(src)?;
    if toks.is_empty() {
        return Err("empty expression".into());
    }
    let mut p = Parser { toks, pos: 0 };
    let expr = p.parse_binary(0)?;
    if p.pos != p.toks.len() {
        return Err(format!("unexpected trailing token: {}", p.toks[p.pos]));
    }
    Ok(expr)
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
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), String> {
        match self.next() {
            Some(t) if &t == tok => Ok(()),
            Some(t) => Err(format!("expected {tok}, found {t}")),
            None => Err(format!("expected {tok}, found end of expression")),
        }
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::OrOr) => BinOp::Or,
                Some(Tok::AndAnd) => BinOp::And,
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::NotEq) => BinOp::Ne,
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                Some(Tok::In) => BinOp::In,
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            let bp = op.binding_power();
            if bp <= min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_binary(bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Tok::Not) => {
                self.next();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            Some(Tok::Minus) => {
                self.next();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Tok::Ident(name)) => {
                            expr = Expr::Member(Box::new(expr), name);
                        }
                        Some(t) => return Err(format!("expected field name after '.', found {t}")),
                        None => return Err("expected field name after '.'".into()),
                    }
                }
                Some(Tok::LBracket) => {
                    self.next();
                    let idx = self.parse_binary(0)?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Some(Tok::LParen) => {
                    let name = match &expr {
                        Expr::Ident(name) => name.clone(),
                        other => {
                            return Err(format!("cannot call non-function: {}", to_src(other)))
                        }
                    };
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        loop {
                            args.push(self.parse_binary(0)?);
                            match self.peek() {
                                Some(Tok::Comma) => {
                                    self.next();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    expr = Expr::Call(name, args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Tok::Null) => Ok(Expr::Null),
            Some(Tok::True) => Ok(Expr::Bool(true)),
            Some(Tok::False) => Ok(Expr::Bool(false)),
            Some(Tok::Int(n)) => Ok(Expr::Int(n)),
            Some(Tok::Float(f)) => Ok(Expr::Float(f)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Tok::LParen) => {
                let inner = self.parse_binary(0)?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Tok::RBracket) {
                    loop {
                        items.push(self.parse_binary(0)?);
                        match self.peek() {
                            Some(Tok::Comma) => {
                                self.next();
                            }
                            _ => break,
                        }
                    }
                }
                self.expect(&Tok::RBracket)?;
                Ok(Expr::Array(items))
            }
            Some(t) => Err(format!("unexpected token: {t}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

/// Reconstruct source text for an expression (used by the condition tree).
pub fn to_src(expr: &Expr) -> String {
    match expr {
        Expr::Null => "null".into(),
        Expr::Bool(b) => b.to_string(),
        Expr::Int(n) => n.to_string(),
        Expr::Float(f) => f.to_string(),
        Expr::Str(s) => format!("{s:?}"),
        Expr::Ident(name) => name.clone(),
        Expr::Member(obj, field) => format!("{}.{field}", to_src(obj)),
        Expr::Index(obj, idx) => format!("{}[{}]", to_src(obj), to_src(idx)),
        Expr::Call(name, args) => {
            let args: Vec<String> = args.iter().map(to_src).collect();
            format!("{name}({})", args.join(", "))
        }
        Expr::Array(items) => {
            let items: Vec<String> = items.iter().map(to_src).collect();
            format!("[{}]", items.join(", "))
        }
        Expr::Unary(UnOp::Not, inner) => format!("!{}", to_src(inner)),
        Expr::Unary(UnOp::Neg, inner) => format!("-{}", to_src(inner)),
        Expr::Binary(op, lhs, rhs) => {
            let l = match **lhs {
                Expr::Binary(..) => format!("({})", to_src(lhs)),
                _ => to_src(lhs),
            };
            let r = match **rhs {
                Expr::Binary(..) => format!("({})", to_src(rhs)),
                _ => to_src(rhs),
            };
            format!("{l} {} {r}", op.symbol())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_comparison() {
        let e = parse("steps[0].res.status == 200").unwrap();
        match e {
            Expr::Binary(BinOp::Eq, lhs, rhs) => {
                assert_eq!(to_src(&lhs), "steps[0].res.status");
                assert_eq!(*rhs, Expr::Int(200));
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn respects_precedence() {
        let e = parse("a == 1 && b == 2 || c").unwrap();
        // (|| (&& (== a 1) (== b 2)) c)
        match e {
            Expr::Binary(BinOp::Or, lhs, _) => match *lhs {
                Expr::Binary(BinOp::And, ..) => {}
                other => panic!("unexpected lhs: {other:?}"),
            },
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn parses_calls_and_arrays() {
        let e = parse("len(vars.items) in [1, 2, 3]").unwrap();
        assert_eq!(to_src(&e), "len(vars.items) in [1, 2, 3]");
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(parse("a b").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn parses_unary() {
        let e = parse("!included && -1 < 0").unwrap();
        assert_eq!(to_src(&e), "!included && (-1 < 0)");
    }
}
