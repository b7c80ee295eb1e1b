//! Row predicates for the in-memory table engine, e.g.
//! `(ImageID==7) & ((RoiID==-1) | (RoiID>=100))`.

use crate::error::{FeatureStoreError, Result};

/// Maximum nesting depth for parsed predicates
const MAX_EXPR_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Lte => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Gte => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Cmp(String, CmpOp, f64),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(syntax(format!("unexpected {tok:?} in '{input}'")));
        }
        Ok(expr)
    }

    /// Evaluates against a row; `lookup` yields the scalar value of a column.
    pub fn eval<F>(&self, lookup: &F) -> Result<bool>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Predicate::Cmp(col, op, rhs) => {
                let lhs = lookup(col.as_str()).ok_or_else(|| {
                    FeatureStoreError::backend("where list", format!("unknown column: {col}"))
                })?;
                Ok(op.apply(lhs, *rhs))
            }
            Predicate::And(l, r) => Ok(l.eval(lookup)? && r.eval(lookup)?),
            Predicate::Or(l, r) => Ok(l.eval(lookup)? || r.eval(lookup)?),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

fn syntax(message: String) -> FeatureStoreError {
    FeatureStoreError::backend("parse predicate", message)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let (op, len) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, 2),
                    ('!', Some('=')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Lte, 2),
                    ('>', Some('=')) => (CmpOp::Gte, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', _) => (CmpOp::Gt, 1),
                    _ => return Err(syntax(format!("bad operator at {i} in '{input}'"))),
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| syntax(format!("bad number '{text}' in '{input}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected '{other}' in '{input}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or_expr(&mut self) -> Result<Predicate> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Predicate::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Predicate> {
        let mut lhs = self.atom()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.atom()?;
            lhs = Predicate::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn atom(&mut self) -> Result<Predicate> {
        match self.next() {
            Some(Token::LParen) => {
                self.depth += 1;
                if self.depth > MAX_EXPR_DEPTH {
                    return Err(syntax(format!(
                        "predicate nesting exceeds {MAX_EXPR_DEPTH}"
                    )));
                }
                let inner = self.or_expr()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(syntax(format!("expected ')', found {other:?}"))),
                }
            }
            Some(Token::Ident(col)) => match (self.next(), self.next()) {
                (Some(Token::Op(op)), Some(Token::Number(v))) => Ok(Predicate::Cmp(col, op, v)),
                (op, value) => Err(syntax(format!(
                    "expected comparison after {col}, found {op:?} {value:?}"
                ))),
            },
            other => Err(syntax(format!("expected condition, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CmpOp, Predicate};

    fn row(image: i64, roi: i64) -> impl Fn(&str) -> Option<f64> {
        move |col: &str| match col {
            "ImageID" => Some(image as f64),
            "RoiID" => Some(roi as f64),
            _ => None,
        }
    }

    #[test]
    fn parses_key_predicates() {
        let p = Predicate::parse("(ImageID==7) & (RoiID==-1)").unwrap();
        assert_eq!(
            p,
            Predicate::And(
                Box::new(Predicate::Cmp("ImageID".into(), CmpOp::Eq, 7.0)),
                Box::new(Predicate::Cmp("RoiID".into(), CmpOp::Eq, -1.0)),
            )
        );
        assert!(p.eval(&row(7, -1)).unwrap());
        assert!(!p.eval(&row(7, 3)).unwrap());
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let p = Predicate::parse("ImageID==1 | ImageID==2 & RoiID>10").unwrap();
        assert!(p.eval(&row(1, 0)).unwrap());
        assert!(!p.eval(&row(2, 5)).unwrap());
        assert!(p.eval(&row(2, 11)).unwrap());

        let grouped = Predicate::parse("(ImageID==1 | ImageID==2) & RoiID>10").unwrap();
        assert!(!grouped.eval(&row(1, 0)).unwrap());
    }

    #[test]
    fn comparison_operators() {
        let r = row(5, 5);
        for (src, expected) in [
            ("ImageID!=5", false),
            ("ImageID<6", true),
            ("ImageID<=5", true),
            ("ImageID>5", false),
            ("ImageID>=5.0", true),
        ] {
            assert_eq!(Predicate::parse(src).unwrap().eval(&r).unwrap(), expected, "{src}");
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "(ImageID==1", "ImageID=1", "ImageID==", "ImageID==1)", "x==1 ^ y==2"] {
            assert!(Predicate::parse(bad).is_err(), "{bad}");
        }
        let deep = format!("{}ImageID==1{}", "(".repeat(40), ")".repeat(40));
        assert!(Predicate::parse(&deep).is_err());
    }

    #[test]
    fn unknown_column_fails_evaluation() {
        let p = Predicate::parse("Width==3").unwrap();
        assert!(p.eval(&row(1, 1)).is_err());
    }
}
