//! Arithmetic over literals for the `calc` function.
//!
//! Grammar: `expr := term (('+'|'-') term)*`, `term := unary (('*'|'/'|'%') unary)*`,
//! `unary := '-' unary | primary`, `primary := number | 'now()' | '(' expr ')'`.

use crate::context::EvalError;
use chrono::Utc;
use serde_json::{Number as JsonNumber, Value as JsonValue};

pub fn calculate(expression: &str) -> Result<JsonValue, EvalError> {
    let mut parser = Parser {
        input: expression.as_bytes(),
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if parser.pos < parser.input.len() {
        return Err(EvalError::syntax(format!(
            "unexpected input in calc expression `{expression}` at position {}",
            parser.pos
        )));
    }
    Ok(number_value(value))
}

/// Integral results become integers so they print without a fraction.
pub fn number_value(value: f64) -> JsonValue {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        JsonValue::Number(JsonNumber::from(value as i64))
    } else {
        JsonNumber::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.input.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                b'+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                b'-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                b'*' => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                b'/' | b'%' => {
                    self.pos += 1;
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(EvalError::runtime("division by zero in calc"));
                    }
                    if op == b'/' {
                        value /= divisor;
                    } else {
                        value %= divisor;
                    }
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(EvalError::syntax("missing `)` in calc expression"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(ch) if ch.is_ascii_digit() || ch == b'.' => self.number(),
            Some(_) if self.input[self.pos..].starts_with(b"now()") => {
                self.pos += "now()".len();
                Ok(Utc::now().timestamp_millis() as f64)
            }
            Some(ch) => Err(EvalError::syntax(format!(
                "unexpected `{}` in calc expression",
                ch as char
            ))),
            None => Err(EvalError::syntax("unexpected end of calc expression")),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_digit()
                || matches!(self.input[self.pos], b'.' | b'e' | b'E'))
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos]).unwrap_or_default();
        text.parse::<f64>()
            .map_err(|_| EvalError::syntax(format!("invalid number `{text}` in calc expression")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(calculate("1 + 2 * 3").expect("calc"), json!(7));
        assert_eq!(calculate("(1 + 2) * 3").expect("calc"), json!(9));
        assert_eq!(calculate("-4 + 10 % 4").expect("calc"), json!(-2));
        assert_eq!(calculate("7 / 2").expect("calc"), json!(3.5));
    }

    #[test]
    fn now_yields_current_millis() {
        let value = calculate("now() - 1000").expect("calc");
        let expected = Utc::now().timestamp_millis() - 1000;
        let actual = value.as_i64().expect("integer");
        assert!((expected - actual).abs() < 5_000);
    }

    #[test]
    fn malformed_expressions_are_syntax_errors() {
        assert!(matches!(calculate("1 +"), Err(EvalError::Syntax { .. })));
        assert!(matches!(calculate("(1"), Err(EvalError::Syntax { .. })));
        assert!(matches!(calculate("abc"), Err(EvalError::Syntax { .. })));
        assert!(matches!(calculate("1/0"), Err(EvalError::Runtime { .. })));
    }
}
