//! Tokenizer for prompt templates.
//!
//! The tokenizer is a small mode machine. Plain text is the base mode; a `{`
//! enters expression mode until the matching `}`, a `<name` enters tag mode
//! until `>` or `/>`, and `/* ... */` comments are skipped wherever text is
//! allowed. A leading `---` fenced section is emitted as a single
//! [`TokenKind::Config`] token.
//!
//! Tokens are produced lazily. The tokenizer is `Clone`, so a caller can
//! snapshot it and restart from any earlier position.

use serde::Serialize;

use crate::error::{CompileError, ErrorKind};

/// Location of a token or node in the source. `line` and `column` are
/// 1-based and describe `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    /// Span from the start of `self` to the end of `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            end: other.end.max(self.end),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    Config(String),
    MustacheOpen,  // {
    MustacheClose, // }
    BlockOpen(String),  // {#name
    BlockBranch,        // {:
    BlockClose(String), // {/name
    TagOpen(String),  // <name
    TagEnd,           // >
    TagSelfClose,     // />
    TagClose(String), // </name>
    AttrName(String),
    AttrValue(String),
    Ident(String),
    Operator(&'static str),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Expr { depth: usize },
    Tag,
}

// Longest first, so that `===` wins over `==` and `=`.
const OPERATORS: &[&str] = &[
    "...", "===", "!==", ">>>", "**", "?.", "??", "==", "!=", "<=", ">=", "&&", "||", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "!", "=", "(",
    ")", "[", "]", ",", ".", ":", "?", "&", "|", "^", "~",
];

const ESCAPABLE: &[char] = &['{', '}', '<', '>', '/', '*', '\\'];

#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    line: usize,
    column: usize,
    modes: Vec<Mode>,
    config_checked: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            line: 1,
            column: 1,
            modes: vec![Mode::Text],
            config_checked: false,
        }
    }

    /// Tokenizer for a bare expression, without the surrounding braces.
    pub fn expression(input: &'a str) -> Self {
        Self {
            modes: vec![Mode::Expr { depth: 0 }],
            config_checked: true,
            ..Self::new(input)
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        let end = (self.cursor + n).min(self.input.len());
        for c in self.input[self.cursor..end].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.cursor = end;
    }

    fn here(&self) -> Span {
        Span {
            start: self.cursor,
            end: self.cursor,
            line: self.line,
            column: self.column,
        }
    }

    /// Current position, used for end-of-input errors.
    pub(crate) fn position(&self) -> Span {
        self.here()
    }

    fn finish(&self, start: Span) -> Span {
        Span {
            end: self.cursor,
            ..start
        }
    }

    fn token(&self, kind: TokenKind, start: Span) -> Option<Token> {
        Some(Token {
            kind,
            span: self.finish(start),
        })
    }

    fn mode(&self) -> Mode {
        self.modes.last().copied().unwrap_or(Mode::Text)
    }

    fn error(&self, kind: ErrorKind, start: Span) -> CompileError {
        CompileError::new(kind, self.finish(start))
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, CompileError> {
        if !self.config_checked {
            self.config_checked = true;
            if let Some(token) = self.lex_config()? {
                return Ok(Some(token));
            }
        }
        if self.remaining().is_empty() {
            return Ok(None);
        }
        match self.mode() {
            Mode::Text => self.lex_text(),
            Mode::Expr { .. } => self.lex_expr(),
            Mode::Tag => self.lex_tag(),
        }
    }

    /// A `---` line, optionally preceded by blank lines, opens the config
    /// section; the next `---` line closes it.
    fn lex_config(&mut self) -> Result<Option<Token>, CompileError> {
        let rest = self.remaining();
        let leading = rest.len() - rest.trim_start().len();
        let mut lines = rest[leading..].split_inclusive('\n');
        match lines.next() {
            Some(first) if first.trim_end() == "---" => {}
            _ => return Ok(None),
        }

        self.advance(leading);
        let start = self.here();
        let opening = self.remaining().split_inclusive('\n').next().unwrap_or("");
        self.advance(opening.len());

        let body_start = self.cursor;
        let mut offset = 0;
        for line in self.remaining().split_inclusive('\n') {
            if line.trim_end() == "---" {
                let body = self.input[body_start..body_start + offset].to_string();
                self.advance(offset + line.len());
                return Ok(self.token(TokenKind::Config(body), start));
            }
            offset += line.len();
        }

        self.advance(self.remaining().len());
        Err(self.error(
            ErrorKind::InvalidConfig("missing closing '---' for the config section".to_string()),
            start,
        ))
    }

    fn lex_text(&mut self) -> Result<Option<Token>, CompileError> {
        let start = self.here();
        let mut text = String::new();

        loop {
            let rest = self.remaining();
            let Some(c) = rest.chars().next() else {
                break;
            };

            match c {
                '\\' => {
                    match rest[1..].chars().next() {
                        Some(escaped) if ESCAPABLE.contains(&escaped) => {
                            text.push(escaped);
                            self.advance(1 + escaped.len_utf8());
                        }
                        _ => {
                            text.push('\\');
                            self.advance(1);
                        }
                    }
                    continue;
                }
                '/' if rest.starts_with("/*") => {
                    let comment_start = self.here();
                    match rest[2..].find("*/") {
                        Some(end) => self.advance(2 + end + 2),
                        None => {
                            self.advance(rest.len());
                            return Err(self.error(ErrorKind::UnclosedComment, comment_start));
                        }
                    }
                    continue;
                }
                '*' if rest.starts_with("*/") => {
                    let here = self.here();
                    self.advance(2);
                    return Err(self.error(ErrorKind::UnexpectedEndOfComment, here));
                }
                '{' | '}' => {}
                '<' if starts_tag(rest) => {}
                _ => {
                    text.push(c);
                    self.advance(c.len_utf8());
                    continue;
                }
            }

            // `c` opens a mustache or a tag.
            if !text.is_empty() {
                break;
            }
            return match c {
                '{' => self.lex_brace(),
                '}' => {
                    self.advance(1);
                    Err(self.error(ErrorKind::UnexpectedMustacheCloseTag, start))
                }
                _ => self.lex_tag_start(),
            };
        }

        if text.is_empty() {
            // Only comments were consumed.
            return self.next_token();
        }
        Ok(self.token(TokenKind::Text(text), start))
    }

    /// Lexes `{`, `{#name`, `{:` or `{/name` and enters expression mode.
    fn lex_brace(&mut self) -> Result<Option<Token>, CompileError> {
        let start = self.here();
        self.advance(1);
        let kind = match self.remaining().chars().next() {
            Some('#') => {
                self.advance(1);
                TokenKind::BlockOpen(self.take_ident())
            }
            Some(':') => {
                self.advance(1);
                TokenKind::BlockBranch
            }
            Some('/') => {
                self.advance(1);
                TokenKind::BlockClose(self.take_ident())
            }
            _ => TokenKind::MustacheOpen,
        };
        self.modes.push(Mode::Expr { depth: 0 });
        Ok(self.token(kind, start))
    }

    fn lex_tag_start(&mut self) -> Result<Option<Token>, CompileError> {
        let start = self.here();
        if self.remaining().starts_with("</") {
            self.advance(2);
            let name = self.take_tag_name();
            if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
                return Err(self.error(ErrorKind::InvalidTagName, start));
            }
            self.skip_whitespace();
            if !self.remaining().starts_with('>') {
                return Err(self.error(ErrorKind::UnexpectedToken(">".to_string()), start));
            }
            self.advance(1);
            return Ok(self.token(TokenKind::TagClose(name), start));
        }

        self.advance(1);
        let name = self.take_tag_name();
        match self.remaining().chars().next() {
            None | Some('>') | Some('/') => {}
            Some(c) if c.is_whitespace() => {}
            Some(c) => {
                self.advance(c.len_utf8());
                return Err(self.error(ErrorKind::InvalidTagName, start));
            }
        }
        self.modes.push(Mode::Tag);
        Ok(self.token(TokenKind::TagOpen(name), start))
    }

    fn lex_tag(&mut self) -> Result<Option<Token>, CompileError> {
        self.skip_whitespace();
        let rest = self.remaining();
        let start = self.here();
        let Some(c) = rest.chars().next() else {
            return Ok(None);
        };

        if rest.starts_with("/>") {
            self.advance(2);
            self.modes.pop();
            return Ok(self.token(TokenKind::TagSelfClose, start));
        }
        match c {
            '>' => {
                self.advance(1);
                self.modes.pop();
                Ok(self.token(TokenKind::TagEnd, start))
            }
            '=' => {
                self.advance(1);
                Ok(self.token(TokenKind::Operator("="), start))
            }
            '"' | '\'' => {
                self.advance(1);
                match self.remaining().find(c) {
                    Some(end) => {
                        let value = self.remaining()[..end].to_string();
                        self.advance(end + 1);
                        Ok(self.token(TokenKind::AttrValue(value), start))
                    }
                    None => {
                        self.advance(self.remaining().len());
                        Err(self.error(ErrorKind::UnclosedAttributeValue(c.to_string()), start))
                    }
                }
            }
            '{' => self.lex_brace(),
            c if is_name_start(c) => {
                let name = self.take_tag_name();
                Ok(self.token(TokenKind::AttrName(name), start))
            }
            _ => Err(self.error(ErrorKind::UnexpectedToken(">".to_string()), start)),
        }
    }

    fn lex_expr(&mut self) -> Result<Option<Token>, CompileError> {
        self.skip_whitespace();
        let rest = self.remaining();
        let start = self.here();
        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };

        match first {
            '{' => {
                self.advance(1);
                if let Some(Mode::Expr { depth }) = self.modes.last_mut() {
                    *depth += 1;
                }
                return Ok(self.token(TokenKind::Operator("{"), start));
            }
            '}' => {
                self.advance(1);
                if let Some(Mode::Expr { depth }) = self.modes.last_mut() {
                    if *depth > 0 {
                        *depth -= 1;
                        return Ok(self.token(TokenKind::Operator("}"), start));
                    }
                }
                self.modes.pop();
                return Ok(self.token(TokenKind::MustacheClose, start));
            }
            '\'' | '"' => return self.lex_string(first),
            _ => {}
        }

        let starts_number = first.is_ascii_digit()
            || (first == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit()));
        if starts_number {
            return self.lex_number();
        }

        if first.is_alphabetic() || first == '_' || first == '$' {
            let ident = self.take_ident();
            return Ok(self.token(TokenKind::Ident(ident), start));
        }

        for op in OPERATORS {
            if rest.starts_with(op) {
                // `a?.5:1` is a conditional, not optional chaining
                if *op == "?." && rest[2..].starts_with(|c: char| c.is_ascii_digit()) {
                    continue;
                }
                self.advance(op.len());
                return Ok(self.token(TokenKind::Operator(op), start));
            }
        }

        self.advance(first.len_utf8());
        Err(self.error(ErrorKind::UnsupportedOperator(first.to_string()), start))
    }

    fn lex_string(&mut self, quote: char) -> Result<Option<Token>, CompileError> {
        let start = self.here();
        self.advance(1);
        let mut value = String::new();
        let mut chars = self.remaining().chars();
        let mut consumed = 0;
        while let Some(c) = chars.next() {
            consumed += c.len_utf8();
            if c == quote {
                self.advance(consumed);
                return Ok(self.token(TokenKind::Str(value), start));
            }
            if c == '\\' {
                if let Some(esc) = chars.next() {
                    consumed += esc.len_utf8();
                    match esc {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        _ => value.push(esc),
                    }
                }
            } else {
                value.push(c);
            }
        }
        self.advance(consumed);
        Err(self.error(ErrorKind::UnexpectedEofToken(quote.to_string()), start))
    }

    fn lex_number(&mut self) -> Result<Option<Token>, CompileError> {
        let start = self.here();
        let rest = self.remaining();
        let bytes = rest.as_bytes();
        let mut len = 0;
        while len < bytes.len() && bytes[len].is_ascii_digit() {
            len += 1;
        }
        if len < bytes.len() && bytes[len] == b'.' && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
            len += 1;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
        if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
            let mut exp = len + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
                len = exp;
                while len < bytes.len() && bytes[len].is_ascii_digit() {
                    len += 1;
                }
            }
        }

        let literal = &rest[..len];
        self.advance(len);
        match literal.parse::<f64>() {
            Ok(value) => Ok(self.token(TokenKind::Number(value), start)),
            Err(_) => Err(self.error(ErrorKind::UnexpectedToken("number".to_string()), start)),
        }
    }

    fn take_ident(&mut self) -> String {
        let ident: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        self.advance(ident.len());
        ident
    }

    fn take_tag_name(&mut self) -> String {
        let name: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
            .collect();
        self.advance(name.len());
        name
    }

    fn skip_whitespace(&mut self) {
        let rest = self.remaining();
        let skipped = rest.len() - rest.trim_start().len();
        self.advance(skipped);
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token, CompileError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

fn starts_tag(rest: &str) -> bool {
    let mut chars = rest.chars().skip(1);
    match chars.next() {
        Some('/') => true,
        Some(c) => c.is_ascii_alphabetic(),
        None => false,
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}
