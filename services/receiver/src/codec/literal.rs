//! Restricted literal parser.
//!
//! Accepts the textual literal forms a log-shipping client produces when it
//! formats a structured message: mappings, lists, tuples, quoted strings,
//! numbers, `True`/`False`/`None`, plus the JSON spellings of the constants.
//! Nothing is ever evaluated; any name, call or operator outside that set is
//! rejected with the byte offset where parsing stopped.

use super::DecodeError;
use serde_json::{Map, Number, Value};

/// Deepest container nesting accepted.
const MAX_DEPTH: usize = 128;

/// Parse a complete literal expression.
pub(crate) fn parse(input: &str) -> Result<Value, DecodeError> {
    let mut parser = Parser {
        src: input,
        pos: 0,
        depth: 0,
    };

    parser.skip_ws();
    if parser.at_end() {
        return Err(parser.error("empty payload"));
    }

    let value = parser.parse_value()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> DecodeError {
        self.error_at(self.pos, reason)
    }

    fn error_at(&self, offset: usize, reason: impl Into<String>) -> DecodeError {
        DecodeError::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\n' | '\r' | '\x0c' => {
                    self.pos += 1;
                }
                '#' => {
                    let line_len = self.rest().find('\n').unwrap_or(self.rest().len());
                    self.pos += line_len;
                }
                _ => break,
            }
        }
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_value(&mut self) -> Result<Value, DecodeError> {
        self.skip_ws();
        let start = self.pos;

        match self.peek() {
            None => Err(self.error("unexpected end of payload")),
            Some('{') => self.parse_mapping(),
            Some('[') => self.parse_list(),
            Some('(') => self.parse_parenthesized(),
            Some('\'') | Some('"') => self.parse_strings(),
            Some('+') | Some('-') => self.parse_signed_number(),
            Some(c) if c.is_ascii_digit() => self.parse_number(false),
            Some('.') if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.parse_number(false)
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name = self.take_identifier();
                if matches!(self.peek(), Some('\'') | Some('"')) {
                    self.pos = start;
                    return self.parse_strings();
                }
                match name {
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    "None" | "null" => Ok(Value::Null),
                    _ => Err(self.error_at(start, format!("name {name:?} is not a literal"))),
                }
            }
            Some(c) => Err(self.error(format!("unexpected character {c:?}"))),
        }
    }

    fn take_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    fn parse_mapping(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.bump();
        let mut map = Map::new();

        loop {
            self.skip_ws();
            if self.eat('}') {
                break;
            }

            let key_offset = self.pos;
            let key = self.parse_value()?;
            self.skip_ws();
            if !self.eat(':') {
                return Err(match self.peek() {
                    Some(',') | Some('}') => self.error("set literals are not supported"),
                    _ => self.error("expected ':' after mapping key"),
                });
            }
            let key = self.mapping_key(key, key_offset)?;
            let value = self.parse_value()?;
            map.insert(key, value);

            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat('}') {
                break;
            }
            return Err(self.error("expected ',' or '}' in mapping"));
        }

        self.leave();
        Ok(Value::Object(map))
    }

    /// Coerce a scalar key the way a JSON dump does.
    fn mapping_key(&self, key: Value, offset: usize) -> Result<String, DecodeError> {
        match key {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok("null".to_string()),
            Value::Array(_) | Value::Object(_) => {
                Err(self.error_at(offset, "mapping keys must be scalars"))
            }
        }
    }

    fn parse_list(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.bump();
        let items = self.parse_sequence_items(']')?;
        self.leave();
        Ok(Value::Array(items))
    }

    /// Parse `(...)`: a tuple when empty or comma-separated, otherwise the
    /// parenthesized value itself.
    fn parse_parenthesized(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.bump();
        self.skip_ws();

        if self.eat(')') {
            self.leave();
            return Ok(Value::Array(Vec::new()));
        }

        let first = self.parse_value()?;
        self.skip_ws();
        if self.eat(')') {
            self.leave();
            return Ok(first);
        }
        if !self.eat(',') {
            return Err(self.error("expected ',' or ')' in tuple"));
        }

        let mut items = vec![first];
        items.extend(self.parse_sequence_items(')')?);
        self.leave();
        Ok(Value::Array(items))
    }

    fn parse_sequence_items(&mut self, close: char) -> Result<Vec<Value>, DecodeError> {
        let mut items = Vec::new();

        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }

            items.push(self.parse_value()?);

            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(close) {
                return Ok(items);
            }
            return Err(self.error(format!("expected ',' or '{close}'")));
        }
    }

    /// Parse one or more adjacent string literals and concatenate them.
    fn parse_strings(&mut self) -> Result<Value, DecodeError> {
        let mut out = self.parse_string()?;

        loop {
            let checkpoint = self.pos;
            self.skip_ws();
            if self.at_string_start() {
                out.push_str(&self.parse_string()?);
            } else {
                self.pos = checkpoint;
                return Ok(Value::String(out));
            }
        }
    }

    fn at_string_start(&self) -> bool {
        let rest = self.rest();
        let prefix_len = rest
            .find(|c: char| !(c.is_ascii_alphabetic()))
            .unwrap_or(rest.len());
        prefix_len <= 2 && matches!(rest[prefix_len..].chars().next(), Some('\'') | Some('"'))
    }

    fn parse_string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let prefix = self.take_identifier().to_ascii_lowercase();
        let raw = match prefix.as_str() {
            "" | "u" => false,
            "r" => true,
            "b" | "br" | "rb" => {
                return Err(self.error_at(start, "bytes literals are not supported"))
            }
            "f" | "fr" | "rf" => {
                return Err(self.error_at(start, "formatted strings are not literals"))
            }
            _ => return Err(self.error_at(start, format!("unknown string prefix {prefix:?}"))),
        };

        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error_at(start, "expected a string")),
        };
        let triple = self.peek() == Some(quote) && self.peek_nth(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error_at(start, "unterminated string"))?;

            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.peek() == Some(quote) && self.peek_nth(1) == Some(quote) {
                    self.pos += 2;
                    return Ok(out);
                }
                out.push(c);
                continue;
            }

            match c {
                '\n' if !triple => return Err(self.error_at(start, "unterminated string")),
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                '\\' => self.parse_escape(&mut out)?,
                _ => out.push(c),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), DecodeError> {
        let offset = self.pos - 1;
        let c = self
            .bump()
            .ok_or_else(|| self.error_at(offset, "unterminated escape"))?;

        match c {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.bump();
                        }
                        None => break,
                    }
                }
                out.push(self.code_point(code, offset)?);
            }
            'x' => out.push(self.hex_escape(2, offset)?),
            'u' => out.push(self.hex_escape(4, offset)?),
            'U' => out.push(self.hex_escape(8, offset)?),
            'N' => return Err(self.error_at(offset, "named unicode escapes are not supported")),
            other => {
                // Unknown escapes are kept verbatim.
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize, offset: usize) -> Result<char, DecodeError> {
        let rest = self.rest();
        let hex = rest
            .get(..digits)
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| self.error_at(offset, format!("expected {digits} hex digits")))?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| self.error_at(offset, "invalid hex escape"))?;
        self.pos += digits;
        self.code_point(code, offset)
    }

    fn code_point(&self, code: u32, offset: usize) -> Result<char, DecodeError> {
        char::from_u32(code)
            .ok_or_else(|| self.error_at(offset, format!("invalid code point {code:#x}")))
    }

    fn parse_signed_number(&mut self) -> Result<Value, DecodeError> {
        let negative = self.bump() == Some('-');
        self.skip_ws();
        match self.peek() {
            Some(c) if c.is_ascii_digit() => self.parse_number(negative),
            Some('.') if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.parse_number(negative)
            }
            _ => Err(self.error("unary operators only apply to numbers")),
        }
    }

    fn parse_number(&mut self, negative: bool) -> Result<Value, DecodeError> {
        let start = self.pos;
        let rest = self.rest();

        let radix = match rest.get(..2).map(str::to_ascii_lowercase).as_deref() {
            Some("0x") => Some(16),
            Some("0o") => Some(8),
            Some("0b") => Some(2),
            _ => None,
        };

        let value = if let Some(radix) = radix {
            self.pos += 2;
            let digits = self.take_digits(|c| c.is_digit(radix));
            if digits.is_empty() {
                return Err(self.error_at(start, "missing digits after radix prefix"));
            }
            integer_value(&digits, radix, negative)
        } else {
            let int_part = self.take_digits(|c| c.is_ascii_digit());
            let mut is_float = false;
            let mut text = int_part.clone();

            if self.peek() == Some('.') {
                is_float = true;
                self.bump();
                text.push('.');
                text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
            }
            if matches!(self.peek(), Some('e') | Some('E')) {
                is_float = true;
                self.bump();
                text.push('e');
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    self.bump();
                    text.push(sign);
                }
                let exponent = self.take_digits(|c| c.is_ascii_digit());
                if exponent.is_empty() {
                    return Err(self.error_at(start, "missing exponent digits"));
                }
                text.push_str(&exponent);
            }

            if is_float {
                let parsed: f64 = text
                    .parse()
                    .map_err(|_| self.error_at(start, "invalid float literal"))?;
                float_value(if negative { -parsed } else { parsed })
            } else {
                if int_part.len() > 1 && int_part.starts_with('0') && int_part.chars().any(|c| c != '0')
                {
                    return Err(self.error_at(start, "leading zeros in integer literal"));
                }
                integer_value(&int_part, 10, negative)
            }
        };

        match self.peek() {
            Some('j') | Some('J') => Err(self.error_at(start, "complex numbers are not supported")),
            Some(c) if c.is_alphanumeric() || c == '_' => {
                Err(self.error_at(start, "invalid number literal"))
            }
            _ => value.ok_or_else(|| self.error_at(start, "number out of range")),
        }
    }

    /// Consume digits allowing single `_` separators between them.
    fn take_digits(&mut self, is_digit: impl Fn(char) -> bool) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if is_digit(c) {
                digits.push(c);
                self.bump();
            } else if c == '_'
                && !digits.is_empty()
                && self.peek_nth(1).is_some_and(&is_digit)
            {
                self.bump();
            } else {
                break;
            }
        }
        digits
    }
}

/// Build an integer value, degrading to a float beyond the 64-bit range.
fn integer_value(digits: &str, radix: u32, negative: bool) -> Option<Value> {
    let magnitude = u128::from_str_radix(digits, radix)
        .ok()
        .and_then(|m| i128::try_from(m).ok());
    if let Some(magnitude) = magnitude {
        let signed = if negative { -magnitude } else { magnitude };
        if let Ok(n) = i64::try_from(signed) {
            return Some(Value::from(n));
        }
        if let Ok(n) = u64::try_from(signed) {
            return Some(Value::from(n));
        }
    }

    let magnitude = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0f64, |acc, d| acc * f64::from(radix) + f64::from(d));
    float_value(if negative { -magnitude } else { magnitude })
}

fn float_value(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(input: &str) -> Value {
        parse(input).unwrap_or_else(|e| panic!("{input:?} failed: {e}"))
    }

    fn reason(input: &str) -> String {
        match parse(input) {
            Err(DecodeError::Malformed { reason, .. }) => reason,
            Ok(v) => panic!("{input:?} unexpectedly parsed as {v}"),
        }
    }

    #[test]
    fn test_constants_in_both_spellings() {
        assert_eq!(ok("[True, False, None]"), json!([true, false, null]));
        assert_eq!(ok("[true, false, null]"), json!([true, false, null]));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(ok("[1, -2, + 3, 1_000, 0x1F, 0o17, 0b101, 0, 00]"), json!([1, -2, 3, 1000, 31, 15, 5, 0, 0]));
        assert_eq!(ok("[1.5, -0.25, .5, 1e3, 2E-2, 3.]"), json!([1.5, -0.25, 0.5, 1000.0, 0.02, 3.0]));
        assert_eq!(ok("18446744073709551615"), json!(18446744073709551615u64));
        assert_eq!(ok("-9223372036854775808"), json!(-9223372036854775808i64));
        assert!(ok("123456789012345678901234567890").is_f64());
    }

    #[test]
    fn test_number_rejections() {
        assert!(reason("1j").contains("complex"));
        assert!(reason("012").contains("leading zeros"));
        assert!(reason("1e").contains("exponent"));
        assert!(reason("0x").contains("radix"));
        assert!(reason("12abc").contains("invalid number"));
        assert!(reason("1e999").contains("out of range"));
        assert!(reason("-'a'").contains("unary"));
    }

    #[test]
    fn test_strings() {
        assert_eq!(ok(r#"'it"s'"#), json!("it\"s"));
        assert_eq!(ok(r#""it's""#), json!("it's"));
        assert_eq!(ok(r"'a\nb\t\\\'\x41é\U0001F600\101'"), json!("a\nb\t\\'Aé😀A"));
        assert_eq!(ok(r"r'\d+\''"), json!(r"\d+\'"));
        assert_eq!(ok("u'x' 'y'  \"z\""), json!("xyz"));
        assert_eq!(ok("'''multi\nline ''' "), json!("multi\nline "));
        assert_eq!(ok(r"'\q'"), json!(r"\q"));
        assert_eq!(ok("'ünïcödé'"), json!("ünïcödé"));
    }

    #[test]
    fn test_string_rejections() {
        assert!(reason("'abc").contains("unterminated"));
        assert!(reason("'a\nb'").contains("unterminated"));
        assert!(reason("b'raw'").contains("bytes"));
        assert!(reason("f'{x}'").contains("formatted"));
        assert!(reason(r"'\x4'").contains("hex"));
        assert!(reason(r"'\ud800'").contains("code point"));
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            ok("{'a': [1, (2, 3), (), (4,), ((5))], 'b': {'c': None,},}"),
            json!({"a": [1, [2, 3], [], [4], 5], "b": {"c": null}})
        );
    }

    #[test]
    fn test_mapping_keys_are_coerced() {
        assert_eq!(
            ok("{1: 'a', 2.5: 'b', True: 'c', None: 'd'}"),
            json!({"1": "a", "2.5": "b", "true": "c", "null": "d"})
        );
        assert!(reason("{[1]: 2}").contains("scalars"));
        assert!(reason("{(1, 2): 2}").contains("scalars"));
    }

    #[test]
    fn test_duplicate_keys_keep_first_position_last_value() {
        let value = ok("{'a': 1, 'b': 2, 'a': 3}");
        let map = value.as_object().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(map["a"], json!(3));
    }

    #[test]
    fn test_rejects_expressions() {
        assert!(reason("__import__('os').system('ls')").contains("not a literal"));
        assert!(reason("{'a': open('x')}").contains("not a literal"));
        assert!(reason("1 + 2").contains("trailing"));
        assert!(reason("{1, 2}").contains("set"));
        assert!(reason("[1, 2").contains("expected"));
        assert!(reason("").contains("empty"));
        assert!(reason("   # only a comment").contains("empty"));
        assert!(reason("{'a': lambda: 1}").contains("not a literal"));
    }

    #[test]
    fn test_comments_and_whitespace() {
        assert_eq!(
            ok("{\n  'a': 1,  # first\n  'b': 2\n}\n"),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}{}", "[".repeat(MAX_DEPTH + 1), "]".repeat(MAX_DEPTH + 1));
        assert!(reason(&deep).contains("nesting"));

        let fine = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse(&fine).is_ok());
    }

    #[test]
    fn test_error_offset_points_at_problem() {
        match parse("{'a': nope}") {
            Err(DecodeError::Malformed { offset, .. }) => assert_eq!(offset, 6),
            other => panic!("unexpected {other:?}"),
        }
    }
}
