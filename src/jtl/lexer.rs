//! On-demand tokenizer for JTL expressions.
//!
//! Outside `{{ … }}` everything is text (with `${{` and `$}}` standing for the
//! literal delimiters). Inside, the lexer recognises a path, a dot, or a single
//! function call whose single-quoted parameters may themselves contain nested
//! `{{ … }}` expressions; those are captured verbatim for a later re-parse.

use std::fmt;

pub const LEFT_META: &str = "{{";
pub const RIGHT_META: &str = "}}";
const ESCAPED_LEFT_META: &str = "${{";
const ESCAPED_RIGHT_META: &str = "$}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    LeftMeta,
    RightMeta,
    LeftBracket,
    RightBracket,
    Path,
    Function,
    Param,
    Dot,
    Error,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Text => "text",
            TokenKind::LeftMeta => "lMeta",
            TokenKind::RightMeta => "rMeta",
            TokenKind::LeftBracket => "lBracket",
            TokenKind::RightBracket => "rBracket",
            TokenKind::Path => "path",
            TokenKind::Function => "function",
            TokenKind::Param => "param",
            TokenKind::Dot => "dot",
            TokenKind::Error => "error",
            TokenKind::Eof => "eof",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: usize,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, pos: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    Meta,
    Args,
    AfterCall,
    Done,
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    state: State,
    pending: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            state: State::Text,
            pending: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn error(&mut self, message: impl Into<String>) -> Token {
        self.state = State::Done;
        Token::new(TokenKind::Error, message, self.pos)
    }

    fn lex_text(&mut self) -> Token {
        let start = self.pos;
        if start >= self.input.len() {
            self.state = State::Done;
            return Token::new(TokenKind::Eof, "", start);
        }

        let rest = self.rest();
        let mut offset = 0;
        while offset < rest.len() {
            let tail = &rest[offset..];
            if tail.starts_with(ESCAPED_LEFT_META)
                || tail.starts_with(ESCAPED_RIGHT_META)
                || tail.starts_with(LEFT_META)
            {
                break;
            }
            offset += tail.chars().next().map(char::len_utf8).unwrap_or(1);
        }

        if offset > 0 {
            self.pos += offset;
            return Token::new(TokenKind::Text, &rest[..offset], start);
        }

        if rest.starts_with(ESCAPED_LEFT_META) {
            self.pos += ESCAPED_LEFT_META.len();
            return Token::new(TokenKind::Text, LEFT_META, start);
        }
        if rest.starts_with(ESCAPED_RIGHT_META) {
            self.pos += ESCAPED_RIGHT_META.len();
            return Token::new(TokenKind::Text, RIGHT_META, start);
        }

        self.pos += LEFT_META.len();
        self.state = State::Meta;
        Token::new(TokenKind::LeftMeta, LEFT_META, start)
    }

    fn lex_meta(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.pos;
        let rest = self.rest();

        if rest.is_empty() {
            return self.error("unterminated expression: missing `}}`");
        }
        if rest.starts_with(RIGHT_META) {
            self.pos += RIGHT_META.len();
            self.state = State::Text;
            return Token::new(TokenKind::RightMeta, RIGHT_META, start);
        }

        let first = rest.chars().next().unwrap_or_default();
        match first {
            '/' => {
                let path = read_path(rest);
                self.pos += path.len();
                Token::new(TokenKind::Path, path, start)
            }
            '.' => {
                let after = &rest[1..];
                if after.starts_with('/') {
                    let path = read_path(after);
                    self.pos += 1 + path.len();
                    Token::new(TokenKind::Path, path, start)
                } else if after.trim_start().is_empty()
                    || after.trim_start().starts_with(RIGHT_META)
                {
                    self.pos += 1;
                    Token::new(TokenKind::Dot, ".", start)
                } else {
                    self.error(format!("invalid path starting at `{}`", preview(rest)))
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let name_len = rest
                    .char_indices()
                    .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '_'))
                    .map(|(idx, _)| idx)
                    .unwrap_or(rest.len());
                let name = &rest[..name_len];
                self.pos += name_len;
                self.skip_whitespace();
                if !self.rest().starts_with('(') {
                    return self.error(format!(
                        "path must start with `/` or `.`, found `{}`",
                        preview(rest)
                    ));
                }
                let bracket_pos = self.pos;
                self.pos += 1;
                self.state = State::Args;
                self.pending = Some(Token::new(TokenKind::LeftBracket, "(", bracket_pos));
                Token::new(TokenKind::Function, name, start)
            }
            _ => self.error(format!(
                "path must start with `/` or `.`, found `{}`",
                preview(rest)
            )),
        }
    }

    fn lex_args(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.pos;
        let rest = self.rest();

        if rest.is_empty() {
            return self.error("unterminated function call: missing `)`");
        }
        if rest.starts_with(')') {
            self.pos += 1;
            self.state = State::AfterCall;
            return Token::new(TokenKind::RightBracket, ")", start);
        }
        if !rest.starts_with('\'') {
            return self.error(format!(
                "function parameters must be single-quoted, found `{}`",
                preview(rest)
            ));
        }

        let Some(len) = scan_param(&rest[1..]) else {
            return self.error("unterminated parameter: missing closing `'`");
        };
        let value = &rest[1..1 + len];
        self.pos += len + 2;

        self.skip_whitespace();
        let after = self.rest();
        if after.starts_with(',') {
            self.pos += 1;
        } else if !after.starts_with(')') {
            return self.error(format!(
                "expected `,` or `)` after parameter, found `{}`",
                preview(after)
            ));
        }

        Token::new(TokenKind::Param, value, start)
    }

    fn lex_after_call(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.pos;
        if self.rest().starts_with(RIGHT_META) {
            self.pos += RIGHT_META.len();
            self.state = State::Text;
            return Token::new(TokenKind::RightMeta, RIGHT_META, start);
        }
        if self.rest().starts_with(')') {
            return self.error("mismatched `)`");
        }
        self.error("expected `}}` after function call")
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.pending.take() {
            return Some(token);
        }
        match self.state {
            State::Text => Some(self.lex_text()),
            State::Meta => Some(self.lex_meta()),
            State::Args => Some(self.lex_args()),
            State::AfterCall => Some(self.lex_after_call()),
            State::Done => None,
        }
    }
}

/// Length of a quoted parameter body. Quotes nested inside `{{ … }}` and
/// backslash-escaped characters do not terminate it.
fn scan_param(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 2,
            b'{' if bytes.get(idx + 1) == Some(&b'{') => {
                depth += 1;
                idx += 2;
            }
            b'}' if depth > 0 && bytes.get(idx + 1) == Some(&b'}') => {
                depth -= 1;
                idx += 2;
            }
            b'\'' if depth == 0 => return Some(idx),
            _ => idx += 1,
        }
    }
    None
}

fn read_path(rest: &str) -> &str {
    let end = rest
        .char_indices()
        .find(|(idx, ch)| ch.is_whitespace() || rest[*idx..].starts_with(RIGHT_META))
        .map(|(idx, _)| idx)
        .unwrap_or(rest.len());
    &rest[..end]
}

fn preview(text: &str) -> String {
    text.chars().take(16).collect()
}

/// True when the text contains an unescaped `{{`.
pub fn contains_meta(text: &str) -> bool {
    let mut search = text;
    while let Some(idx) = search.find(LEFT_META) {
        if idx == 0 || !search[..idx].ends_with('$') {
            return true;
        }
        search = &search[idx + LEFT_META.len()..];
    }
    false
}

/// Drops a backslash that precedes one of the characters JTL treats specially.
pub fn remove_escapes(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '\'' | '\\' | '{' | '}' | '(' | ')' | ',') {
                    output.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        output.push(ch);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input).map(|token| token.kind).collect()
    }

    #[test]
    fn plain_text_is_one_token() {
        assert_eq!(kinds("hello"), vec![TokenKind::Text, TokenKind::Eof]);
    }

    #[test]
    fn escaped_delimiters_become_text() {
        let tokens: Vec<Token> = Lexer::new("a${{b$}}").collect();
        let text: String = tokens
            .iter()
            .filter(|token| token.kind == TokenKind::Text)
            .map(|token| token.value.as_str())
            .collect();
        assert_eq!(text, "a{{b}}");
    }

    #[test]
    fn nested_param_is_captured_verbatim() {
        let tokens: Vec<Token> =
            Lexer::new("{{ifte('{{equals('{{/a}}','1')}}','yes','no')}}").collect();
        let params: Vec<&str> = tokens
            .iter()
            .filter(|token| token.kind == TokenKind::Param)
            .map(|token| token.value.as_str())
            .collect();
        assert_eq!(params, vec!["{{equals('{{/a}}','1')}}", "yes", "no"]);
    }

    #[test]
    fn unterminated_constructs_report_errors() {
        assert_eq!(
            kinds("{{/a"),
            vec![TokenKind::LeftMeta, TokenKind::Path, TokenKind::Error]
        );
        assert!(kinds("{{upper('a'}}").contains(&TokenKind::Error));
        assert!(kinds("{{abc}}").contains(&TokenKind::Error));
    }

    #[test]
    fn removes_only_meaningful_escapes() {
        assert_eq!(remove_escapes(r"it\'s"), "it's");
        assert_eq!(remove_escapes(r"C:\dir"), r"C:\dir");
    }
}
