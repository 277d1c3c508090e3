//! # Clarity Values
//!
//! Parser and printer for the Clarity value repr the Stacks API returns for
//! contract logs and transaction results, e.g.
//! `(tuple (event "CallMessage") (sn u5) (data 0x6869))`.

use std::collections::BTreeMap;
use std::fmt;

/// A Clarity value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClarityValue {
    /// `u5`
    UInt(u128),
    /// `-5`
    Int(i128),
    /// `true` / `false`
    Bool(bool),
    /// `0x6869`
    Buff(Vec<u8>),
    /// `"text"` or `u"text"`
    Str(String),
    /// `'SP000...` or `'SP000....contract`
    Principal(String),
    /// `(tuple (k v) ...)`
    Tuple(BTreeMap<String, ClarityValue>),
    /// `(list v ...)`
    List(Vec<ClarityValue>),
    /// `(some v)`
    Some(Box<ClarityValue>),
    /// `none`
    None,
    /// `(ok v)`
    Ok(Box<ClarityValue>),
    /// `(err v)`
    Err(Box<ClarityValue>),
}

impl ClarityValue {
    /// Parse a single value; trailing input is an error.
    pub fn parse(repr: &str) -> Result<Self, String> {
        let mut parser = Parser {
            src: repr.as_bytes(),
            pos: 0,
        };
        let value = parser.value()?;
        parser.skip_ws();
        if parser.pos != parser.src.len() {
            return Err(format!("trailing input at {} in {:?}", parser.pos, repr));
        }
        Ok(value)
    }

    /// Tuple field.
    pub fn field(&self, name: &str) -> Option<&ClarityValue> {
        match self {
            ClarityValue::Tuple(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Unsigned or non-negative signed integer.
    pub fn as_u128(&self) -> Option<u128> {
        match self {
            ClarityValue::UInt(v) => Some(*v),
            ClarityValue::Int(v) => u128::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Integer of either sign narrowed to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ClarityValue::UInt(v) => i64::try_from(*v).ok(),
            ClarityValue::Int(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// String or principal text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ClarityValue::Str(s) | ClarityValue::Principal(s) => Some(s),
            _ => None,
        }
    }

    /// Buffer bytes.
    pub fn as_buff(&self) -> Option<&[u8]> {
        match self {
            ClarityValue::Buff(b) => Some(b),
            _ => None,
        }
    }

    /// Build a tuple from `(name, value)` pairs.
    pub fn tuple<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ClarityValue)>,
        K: Into<String>,
    {
        ClarityValue::Tuple(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for ClarityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClarityValue::UInt(v) => write!(f, "u{}", v),
            ClarityValue::Int(v) => write!(f, "{}", v),
            ClarityValue::Bool(b) => write!(f, "{}", b),
            ClarityValue::Buff(b) => write!(f, "0x{}", hex::encode(b)),
            ClarityValue::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            ClarityValue::Principal(p) => write!(f, "'{}", p),
            ClarityValue::Tuple(fields) => {
                f.write_str("(tuple")?;
                for (k, v) in fields {
                    write!(f, " ({} {})", k, v)?;
                }
                f.write_str(")")
            }
            ClarityValue::List(items) => {
                f.write_str("(list")?;
                for item in items {
                    write!(f, " {}", item)?;
                }
                f.write_str(")")
            }
            ClarityValue::Some(v) => write!(f, "(some {})", v),
            ClarityValue::None => f.write_str("none"),
            ClarityValue::Ok(v) => write!(f, "(ok {})", v),
            ClarityValue::Err(v) => write!(f, "(err {})", v),
        }
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), String> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected {:?} at {}", byte as char, self.pos))
        }
    }

    fn atom(&mut self) -> &str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b'(' || b == b')' {
                break;
            }
            self.pos += 1;
        }
        std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default()
    }

    fn string(&mut self) -> Result<String, String> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err("unterminated string".into()),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    let escaped = self.src.get(self.pos + 1).copied();
                    out.push(match escaped {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b) => b,
                        None => return Err("dangling escape".into()),
                    });
                    self.pos += 2;
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        String::from_utf8(out).map_err(|e| e.to_string())
    }

    fn value(&mut self) -> Result<ClarityValue, String> {
        self.skip_ws();
        match self.peek() {
            None => Err("unexpected end of input".into()),
            Some(b'(') => self.form(),
            Some(b'"') => self.string().map(ClarityValue::Str),
            Some(b'u') if self.src.get(self.pos + 1) == Some(&b'"') => {
                self.pos += 1;
                self.string().map(ClarityValue::Str)
            }
            Some(b'\'') => {
                self.pos += 1;
                let principal = self.atom().to_string();
                if principal.is_empty() {
                    return Err(format!("empty principal at {}", self.pos));
                }
                Ok(ClarityValue::Principal(principal))
            }
            Some(_) => {
                let at = self.pos;
                let atom = self.atom().to_string();
                literal(&atom).ok_or_else(|| format!("unknown literal {:?} at {}", atom, at))
            }
        }
    }

    fn form(&mut self) -> Result<ClarityValue, String> {
        self.expect(b'(')?;
        self.skip_ws();
        let head = self.atom().to_string();
        let value = match head.as_str() {
            "tuple" => {
                let mut fields = BTreeMap::new();
                loop {
                    self.skip_ws();
                    if self.peek() == Some(b')') {
                        break;
                    }
                    self.expect(b'(')?;
                    self.skip_ws();
                    let key = self.atom().to_string();
                    let val = self.value()?;
                    self.expect(b')')?;
                    fields.insert(key, val);
                }
                ClarityValue::Tuple(fields)
            }
            "list" => {
                let mut items = Vec::new();
                loop {
                    self.skip_ws();
                    if self.peek() == Some(b')') {
                        break;
                    }
                    items.push(self.value()?);
                }
                ClarityValue::List(items)
            }
            "some" => ClarityValue::Some(Box::new(self.value()?)),
            "ok" => ClarityValue::Ok(Box::new(self.value()?)),
            "err" => ClarityValue::Err(Box::new(self.value()?)),
            other => return Err(format!("unknown form {:?}", other)),
        };
        self.expect(b')')?;
        Ok(value)
    }
}

fn literal(atom: &str) -> Option<ClarityValue> {
    match atom {
        "true" => return Some(ClarityValue::Bool(true)),
        "false" => return Some(ClarityValue::Bool(false)),
        "none" => return Some(ClarityValue::None),
        _ => {}
    }
    if let Some(digits) = atom.strip_prefix("0x") {
        return hex::decode(digits).ok().map(ClarityValue::Buff);
    }
    if let Some(digits) = atom.strip_prefix('u') {
        return digits.parse().ok().map(ClarityValue::UInt);
    }
    atom.parse().ok().map(ClarityValue::Int)
}
