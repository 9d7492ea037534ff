//! Canonical value encoding.
//!
//! [`encode`] produces a deterministic, non-colliding string form of any
//! [`Value`]: object keys are sorted, numbers that compare equal encode
//! identically (so `1` and `1.0` land in the same group), and dates,
//! regexes and the missing sentinel carry explicit tags. The engine uses
//! these strings as hash keys for `$group`, `$lookup` and the set
//! operators. [`decode`] is the exact inverse over all supported types.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::value::{Map, Value};

/// Encode a value into its canonical string form.
///
/// # Examples
///
/// ```
/// use nutmeg::{codec, Value};
///
/// let v = Value::object([("b", Value::Int(2)), ("a", Value::Int(1))]);
/// assert_eq!(codec::encode(&v), r#"{"a":1,"b":2}"#);
/// // Numerically equal values share an encoding
/// assert_eq!(codec::encode(&Value::Float(2.0)), codec::encode(&Value::Int(2)));
/// ```
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Missing => out.push_str("missing"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(n) => write_float(out, *n),
        Value::String(s) => write_string(out, s),
        Value::Date(dt) => {
            out.push_str("date(");
            out.push_str(&dt.timestamp_millis().to_string());
            out.push(')');
        }
        Value::Regex(re) => {
            out.push_str("regex(");
            write_string(out, re.as_str());
            out.push(')');
        }
        Value::Array(arr) => {
            out.push('[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, v);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            // Sorted keys keep the encoding deterministic
            let mut keys: Vec<_> = obj.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, k);
                out.push(':');
                write_value(out, &obj[*k]);
            }
            out.push('}');
        }
    }
}

/// Whole finite floats encode in integer form so that values that compare
/// equal hash equal.
fn write_float(out: &mut String, n: f64) {
    if n.is_nan() {
        out.push_str("nan");
    } else if n.is_infinite() {
        out.push_str(if n > 0.0 { "inf" } else { "-inf" });
    } else if n.fract() == 0.0 && n.abs() < 9.2e18 {
        out.push_str(&(n as i64).to_string());
    } else {
        let s = n.to_string();
        out.push_str(&s);
        if !s.contains('.') && !s.contains('e') {
            out.push_str(".0");
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Decode a canonically encoded string back into a value.
///
/// Inverse of [`encode`] for every supported type. Numbers encoded in
/// integer form decode as `Int`, which is structurally equal to the
/// float they may have started as.
pub fn decode(input: &str) -> Result<Value> {
    let mut p = Decoder {
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = p.value()?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(p.fail("trailing input"));
    }
    Ok(value)
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn fail(&self, msg: &str) -> Error {
        Error::Type(format!("invalid encoding at byte {}: {}", self.pos, msg))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.bytes[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.fail(&format!("expected '{}'", token)))
        }
    }

    fn value(&mut self) -> Result<Value> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.fail("unexpected end of input")),
            Some(b'n') => {
                if self.eat("null") {
                    Ok(Value::Null)
                } else if self.eat("nan") {
                    Ok(Value::Float(f64::NAN))
                } else {
                    Err(self.fail("expected 'null' or 'nan'"))
                }
            }
            Some(b'm') => {
                self.expect("missing")?;
                Ok(Value::Missing)
            }
            Some(b't') => {
                self.expect("true")?;
                Ok(Value::Bool(true))
            }
            Some(b'f') => {
                self.expect("false")?;
                Ok(Value::Bool(false))
            }
            Some(b'i') => {
                self.expect("inf")?;
                Ok(Value::Float(f64::INFINITY))
            }
            Some(b'd') => {
                self.expect("date(")?;
                let millis = match self.number()? {
                    Value::Int(n) => n,
                    _ => return Err(self.fail("date payload must be integer millis")),
                };
                self.expect(")")?;
                let dt = DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| self.fail("date millis out of range"))?;
                Ok(Value::Date(dt))
            }
            Some(b'r') => {
                self.expect("regex(")?;
                let pattern = self.string()?;
                self.expect(")")?;
                let re = regex::Regex::new(&pattern)
                    .map_err(|e| Error::Type(format!("invalid regex in encoding: {}", e)))?;
                Ok(Value::Regex(re))
            }
            Some(b'"') => Ok(Value::String(self.string()?)),
            Some(b'[') => {
                self.pos += 1;
                let mut arr = Vec::new();
                self.skip_ws();
                if self.eat("]") {
                    return Ok(Value::Array(arr));
                }
                loop {
                    arr.push(self.value()?);
                    self.skip_ws();
                    if self.eat("]") {
                        return Ok(Value::Array(arr));
                    }
                    self.expect(",")?;
                }
            }
            Some(b'{') => {
                self.pos += 1;
                let mut obj = Map::new();
                self.skip_ws();
                if self.eat("}") {
                    return Ok(Value::Object(obj));
                }
                loop {
                    self.skip_ws();
                    let key = self.string()?;
                    self.skip_ws();
                    self.expect(":")?;
                    obj.insert(key, self.value()?);
                    self.skip_ws();
                    if self.eat("}") {
                        return Ok(Value::Object(obj));
                    }
                    self.expect(",")?;
                }
            }
            Some(b'-') if self.bytes[self.pos..].starts_with(b"-inf") => {
                self.pos += 4;
                Ok(Value::Float(f64::NEG_INFINITY))
            }
            Some(c) if c == b'-' || c.is_ascii_digit() => self.number(),
            Some(c) => Err(self.fail(&format!("unexpected byte '{}'", c as char))),
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' | b'e' | b'E' | b'+' => {
                    is_float = true;
                    self.pos += 1;
                }
                b'-' if is_float => self.pos += 1,
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.fail("non-utf8 number"))?;
        if is_float {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.fail("malformed float"))
        } else {
            text.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| self.fail("malformed integer"))
        }
    }

    fn string(&mut self) -> Result<String> {
        self.expect("\"")?;
        let mut s = String::new();
        loop {
            let rest = &self.bytes[self.pos..];
            let Some(&c) = rest.first() else {
                return Err(self.fail("unterminated string"));
            };
            match c {
                b'"' => {
                    self.pos += 1;
                    return Ok(s);
                }
                b'\\' => {
                    let esc = rest.get(1).copied().ok_or_else(|| self.fail("bad escape"))?;
                    self.pos += 2;
                    match esc {
                        b'"' => s.push('"'),
                        b'\\' => s.push('\\'),
                        b'n' => s.push('\n'),
                        b'r' => s.push('\r'),
                        b't' => s.push('\t'),
                        b'u' => {
                            let hex = self
                                .bytes
                                .get(self.pos..self.pos + 4)
                                .and_then(|h| std::str::from_utf8(h).ok())
                                .ok_or_else(|| self.fail("bad unicode escape"))?;
                            let code = u32::from_str_radix(hex, 16)
                                .map_err(|_| self.fail("bad unicode escape"))?;
                            self.pos += 4;
                            s.push(
                                char::from_u32(code).ok_or_else(|| self.fail("bad codepoint"))?,
                            );
                        }
                        _ => return Err(self.fail("unknown escape")),
                    }
                }
                _ => {
                    // Consume one UTF-8 scalar
                    let tail = std::str::from_utf8(rest)
                        .map_err(|_| self.fail("non-utf8 string"))?;
                    let Some(ch) = tail.chars().next() else {
                        return Err(self.fail("unterminated string"));
                    };
                    s.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }
}
