use std::collections::VecDeque;

use crate::ast::*;
use crate::config::parse_config;
use crate::error::{CompileError, ErrorKind, Result};
use crate::lexer::{Span, Token, TokenKind, Tokenizer};

/// A construct that has been opened and waits for its closer.
#[derive(Debug, Clone, PartialEq)]
enum Open {
    If { has_else: bool },
    Each { has_else: bool },
    Tag(String),
}

impl Open {
    fn describe(&self) -> String {
        match self {
            Open::If { .. } => "{#if}".to_string(),
            Open::Each { .. } => "{#each}".to_string(),
            Open::Tag(name) => format!("<{name}>"),
        }
    }

    fn closer(&self) -> String {
        match self {
            Open::If { .. } => "{/if}".to_string(),
            Open::Each { .. } => "{/each}".to_string(),
            Open::Tag(name) => format!("</{name}>"),
        }
    }
}

// Lowest precedence first. `**` and the unary operators sit below the last
// level.
const BINARY_LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("??", BinaryOp::Nullish)],
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[("|", BinaryOp::BitOr)],
    &[("^", BinaryOp::BitXor)],
    &[("&", BinaryOp::BitAnd)],
    &[
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::NotEq),
        ("===", BinaryOp::StrictEq),
        ("!==", BinaryOp::StrictNotEq),
    ],
    &[
        ("<", BinaryOp::Lt),
        ("<=", BinaryOp::LtEq),
        (">", BinaryOp::Gt),
        (">=", BinaryOp::GtEq),
        ("in", BinaryOp::In),
        ("instanceof", BinaryOp::InstanceOf),
    ],
    &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr), (">>>", BinaryOp::UShr)],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

pub struct Parser<'a> {
    lexer: Tokenizer<'a>,
    buffer: VecDeque<Token>,
    open: Vec<Open>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            lexer: Tokenizer::new(input),
            buffer: VecDeque::new(),
            open: Vec::new(),
        }
    }

    /// Parser for a standalone expression such as `user.name + "!"`.
    pub fn expression(input: &'a str) -> Self {
        Self {
            lexer: Tokenizer::expression(input),
            ..Self::new(input)
        }
    }

    fn peek(&mut self, n: usize) -> Result<Option<&Token>> {
        while self.buffer.len() <= n {
            match self.lexer.next_token()? {
                Some(token) => self.buffer.push_back(token),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.get(n))
    }

    fn peek_kind(&mut self, n: usize) -> Result<Option<TokenKind>> {
        Ok(self.peek(n)?.map(|token| token.kind.clone()))
    }

    fn consume(&mut self) -> Result<Option<Token>> {
        match self.buffer.pop_front() {
            Some(token) => Ok(Some(token)),
            None => self.lexer.next_token(),
        }
    }

    fn eof(&self, awaited: &str) -> CompileError {
        CompileError::new(
            ErrorKind::UnexpectedEofToken(awaited.to_string()),
            self.lexer.position(),
        )
    }

    fn next_required(&mut self, awaited: &str) -> Result<Token> {
        match self.consume()? {
            Some(token) => Ok(token),
            None => Err(self.eof(awaited)),
        }
    }

    /// `UnexpectedToken(expected)` located at the next token.
    fn unexpected(&mut self, expected: &str) -> CompileError {
        let span = match self.peek(0) {
            Ok(Some(token)) => token.span,
            Ok(None) => return self.eof(expected),
            Err(err) => return err,
        };
        CompileError::new(ErrorKind::UnexpectedToken(expected.to_string()), span)
    }

    fn is_operator(&mut self, op: &str) -> Result<bool> {
        Ok(matches!(
            self.peek(0)?,
            Some(Token { kind: TokenKind::Operator(found), .. }) if *found == op
        ))
    }

    fn eat_operator(&mut self, op: &str) -> Result<Option<Token>> {
        if self.is_operator(op)? {
            self.consume()
        } else {
            Ok(None)
        }
    }

    fn expect_operator(&mut self, op: &'static str) -> Result<Token> {
        match self.eat_operator(op)? {
            Some(token) => Ok(token),
            None => Err(self.unexpected(op)),
        }
    }

    fn eat_ident(&mut self, word: &str) -> Result<bool> {
        let found = matches!(
            self.peek(0)?,
            Some(Token { kind: TokenKind::Ident(name), .. }) if name == word
        );
        if found {
            self.consume()?;
        }
        Ok(found)
    }

    fn expect_close(&mut self) -> Result<Span> {
        let token = self.next_required("}")?;
        match token.kind {
            TokenKind::MustacheClose => Ok(token.span),
            _ => Err(CompileError::new(
                ErrorKind::UnexpectedToken("}".to_string()),
                token.span,
            )),
        }
    }

    pub fn parse(&mut self) -> Result<Document> {
        let mut nodes = Vec::new();
        if let Some(Token {
            kind: TokenKind::Config(source),
            span,
        }) = self.peek(0)?.cloned()
        {
            self.consume()?;
            let entries = parse_config(&source)
                .map_err(|message| CompileError::new(ErrorKind::InvalidConfig(message), span))?;
            nodes.push(Node::Config { entries, span });
        }
        nodes.extend(self.parse_fragments()?);
        Ok(Document { nodes })
    }

    /// Parses fragments until the closer (or branch) of the innermost open
    /// construct, which is left in the buffer for the caller.
    fn parse_fragments(&mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            let Some(token) = self.peek(0)?.cloned() else {
                return match self.open.last() {
                    Some(open) => Err(self.eof(&open.closer())),
                    None => Ok(nodes),
                };
            };

            match token.kind {
                TokenKind::Text(value) => {
                    self.consume()?;
                    nodes.push(Node::Text {
                        value,
                        span: token.span,
                    });
                }
                TokenKind::MustacheOpen => {
                    self.consume()?;
                    let expr = self.parse_expr()?;
                    let end = self.expect_close()?;
                    nodes.push(Node::Mustache {
                        expr,
                        span: token.span.to(end),
                    });
                }
                TokenKind::BlockOpen(name) => {
                    self.consume()?;
                    let node = match name.as_str() {
                        "if" => self.parse_if(token.span)?,
                        "each" => self.parse_each(token.span)?,
                        _ => {
                            return Err(CompileError::new(ErrorKind::ExpectedBlockType, token.span))
                        }
                    };
                    nodes.push(node);
                }
                TokenKind::BlockBranch => {
                    self.check_branch_placement(token.span)?;
                    return Ok(nodes);
                }
                TokenKind::BlockClose(name) => {
                    let closes_top = match self.open.last() {
                        Some(Open::If { .. }) => name == "if",
                        Some(Open::Each { .. }) => name == "each",
                        _ => false,
                    };
                    if closes_top {
                        return Ok(nodes);
                    }
                    return Err(CompileError::new(ErrorKind::UnexpectedBlockClose, token.span));
                }
                TokenKind::TagOpen(name) => {
                    self.consume()?;
                    nodes.push(self.parse_tag(name, token.span)?);
                }
                TokenKind::TagClose(name) => {
                    if matches!(self.open.last(), Some(Open::Tag(open)) if *open == name) {
                        return Ok(nodes);
                    }
                    return Err(CompileError::new(ErrorKind::UnexpectedTagClose(name), token.span));
                }
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::UnexpectedToken("text".to_string()),
                        token.span,
                    ))
                }
            }
        }
    }

    /// Validates a `{:else}` / `{:else if}` against the open constructs.
    fn check_branch_placement(&mut self, span: Span) -> Result<()> {
        let first = self.peek_kind(1)?;
        let second = self.peek_kind(2)?;
        let else_if = match first {
            Some(TokenKind::Ident(word)) if word == "elseif" => {
                return Err(CompileError::new(ErrorKind::InvalidElseif, span))
            }
            Some(TokenKind::Ident(word)) if word == "else" => {
                matches!(second, Some(TokenKind::Ident(ref word)) if word == "if")
            }
            _ => {
                return Err(CompileError::new(
                    ErrorKind::UnexpectedToken("else".to_string()),
                    span,
                ))
            }
        };

        let top = self.open.last();
        let kind = if else_if {
            let inside_if = self.open.iter().any(|open| matches!(open, Open::If { .. }));
            match top {
                Some(Open::If { has_else: false }) => return Ok(()),
                Some(inner) if inside_if => {
                    ErrorKind::InvalidElseifPlacementUnclosedBlock(inner.describe())
                }
                _ => ErrorKind::InvalidElseifPlacementOutsideIf,
            }
        } else {
            let inside_block = self
                .open
                .iter()
                .any(|open| matches!(open, Open::If { .. } | Open::Each { .. }));
            match top {
                Some(Open::If { has_else: false } | Open::Each { has_else: false }) => {
                    return Ok(())
                }
                Some(inner) if inside_block => {
                    ErrorKind::InvalidElsePlacementUnclosedBlock(inner.describe())
                }
                _ => ErrorKind::InvalidElsePlacementOutsideIf,
            }
        };
        Err(CompileError::new(kind, span))
    }

    fn mark_else(&mut self) {
        if let Some(Open::If { has_else } | Open::Each { has_else }) = self.open.last_mut() {
            *has_else = true;
        }
    }

    fn parse_if(&mut self, start: Span) -> Result<Node> {
        let condition = self.parse_expr()?;
        self.expect_close()?;
        self.open.push(Open::If { has_else: false });

        let consequent = self.parse_fragments()?;
        let mut alternates = Vec::new();
        let end = loop {
            let token = self.next_required("{/if}")?;
            match token.kind {
                TokenKind::BlockBranch => {
                    self.consume()?; // else
                    if self.eat_ident("if")? {
                        let condition = self.parse_expr()?;
                        self.expect_close()?;
                        let body = self.parse_fragments()?;
                        alternates.push(Alternate::ElseIf { condition, body });
                    } else {
                        self.expect_close()?;
                        self.mark_else();
                        let body = self.parse_fragments()?;
                        alternates.push(Alternate::Else { body });
                    }
                }
                _ => break self.expect_close()?,
            }
        };

        self.open.pop();
        Ok(Node::If(IfBlock {
            condition,
            consequent,
            alternates,
            span: start.to(end),
        }))
    }

    fn parse_each(&mut self, start: Span) -> Result<Node> {
        let iterable = self.parse_expr()?;
        if !self.eat_ident("as")? {
            return Err(self.unexpected("as"));
        }
        let item = self.parse_pattern()?;
        let index = match self.eat_operator(",")? {
            Some(_) => Some(self.parse_name()?),
            None => None,
        };
        self.expect_close()?;
        self.open.push(Open::Each { has_else: false });

        let body = self.parse_fragments()?;
        let mut fallback = None;
        let end = loop {
            let token = self.next_required("{/each}")?;
            match token.kind {
                TokenKind::BlockBranch => {
                    self.consume()?; // else
                    self.expect_close()?;
                    self.mark_else();
                    fallback = Some(self.parse_fragments()?);
                }
                _ => break self.expect_close()?,
            }
        };

        self.open.pop();
        Ok(Node::Each(EachBlock {
            iterable,
            item,
            index,
            body,
            fallback,
            span: start.to(end),
        }))
    }

    fn parse_pattern(&mut self) -> Result<Pattern> {
        let token = self.next_required("}")?;
        match token.kind {
            TokenKind::Ident(name) => Ok(Pattern::Ident(Ident {
                name,
                span: token.span,
            })),
            TokenKind::Operator("{") => {
                let mut entries = Vec::new();
                loop {
                    if self.eat_operator("}")?.is_some() {
                        break;
                    }
                    let key = self.parse_name()?;
                    let binding = match self.eat_operator(":")? {
                        Some(_) => self.parse_pattern()?,
                        None => Pattern::Ident(key.clone()),
                    };
                    entries.push((key, binding));
                    if self.eat_operator(",")?.is_none() {
                        self.expect_operator("}")?;
                        break;
                    }
                }
                Ok(Pattern::Object(entries))
            }
            TokenKind::Operator("[") => {
                let mut items = Vec::new();
                loop {
                    if self.eat_operator("]")?.is_some() {
                        break;
                    }
                    items.push(self.parse_pattern()?);
                    if self.eat_operator(",")?.is_none() {
                        self.expect_operator("]")?;
                        break;
                    }
                }
                Ok(Pattern::Array(items))
            }
            _ => Err(CompileError::new(ErrorKind::UnexpectedTokenDestructure, token.span)),
        }
    }

    fn parse_name(&mut self) -> Result<Ident> {
        match self.consume()? {
            Some(Token {
                kind: TokenKind::Ident(name),
                span,
            }) => Ok(Ident { name, span }),
            Some(token) => Err(CompileError::new(ErrorKind::ExpectedName, token.span)),
            None => Err(CompileError::new(ErrorKind::ExpectedName, self.lexer.position())),
        }
    }

    fn parse_tag(&mut self, name: String, start: Span) -> Result<Node> {
        let kind = TagKind::from_name(&name);
        let mut attributes = Attributes::new();

        let (self_closing, mut end) = loop {
            let token = self.next_required(">")?;
            match token.kind {
                TokenKind::AttrName(attr) => {
                    if attributes.contains_key(&attr) {
                        return Err(CompileError::new(ErrorKind::DuplicateAttribute, token.span));
                    }
                    let value = self.parse_attribute_value()?;
                    attributes.insert(
                        attr,
                        Attribute {
                            value,
                            span: token.span,
                        },
                    );
                }
                TokenKind::TagEnd => break (false, token.span),
                TokenKind::TagSelfClose => break (true, token.span),
                TokenKind::BlockOpen(block) => {
                    return Err(CompileError::new(
                        ErrorKind::InvalidLogicBlockPlacement {
                            location: "placed inside a tag's attribute list".to_string(),
                            name: block,
                        },
                        token.span,
                    ))
                }
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::UnexpectedToken(">".to_string()),
                        token.span,
                    ))
                }
            }
        };

        for name in kind.static_attributes() {
            if let Some(Attribute {
                value: AttributeValue::Expr(_),
                span,
            }) = attributes.get(*name)
            {
                return Err(CompileError::new(
                    ErrorKind::InvalidStaticAttribute(name.to_string()),
                    *span,
                ));
            }
        }

        let mut children = Vec::new();
        if !self_closing {
            self.open.push(Open::Tag(name.clone()));
            children = self.parse_fragments()?;
            end = self.next_required(&format!("</{name}>"))?.span;
            self.open.pop();
        }

        Ok(Node::Tag(Tag {
            kind,
            name,
            attributes,
            children,
            span: start.to(end),
        }))
    }

    fn parse_attribute_value(&mut self) -> Result<AttributeValue> {
        if self.eat_operator("=")?.is_none() {
            return Ok(AttributeValue::Flag);
        }
        let token = match self.consume()? {
            Some(token) => token,
            None => {
                return Err(CompileError::new(
                    ErrorKind::MissingAttributeValue,
                    self.lexer.position(),
                ))
            }
        };
        match token.kind {
            TokenKind::AttrValue(value) => Ok(AttributeValue::Static(value)),
            TokenKind::MustacheOpen => {
                let expr = self.parse_expr()?;
                self.expect_close()?;
                Ok(AttributeValue::Expr(expr))
            }
            TokenKind::BlockOpen(block) => Err(CompileError::new(
                ErrorKind::InvalidLogicBlockPlacement {
                    location: "used as an attribute value".to_string(),
                    name: block,
                },
                token.span,
            )),
            _ => Err(CompileError::new(ErrorKind::MissingAttributeValue, token.span)),
        }
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_conditional()?;
        let op = match self.peek_kind(0)? {
            Some(TokenKind::Operator(op)) => match op {
                "=" => AssignOp::Assign,
                "+=" => AssignOp::Add,
                "-=" => AssignOp::Sub,
                "*=" => AssignOp::Mul,
                "/=" => AssignOp::Div,
                "%=" => AssignOp::Rem,
                _ => return Ok(target),
            },
            _ => return Ok(target),
        };
        self.consume()?;
        let value = self.parse_assignment()?;
        let span = target.span.to(value.span);
        Ok(Expr {
            kind: ExprKind::Assignment {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            span,
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_binary(0)?;
        if self.eat_operator("?")?.is_none() {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_operator(":")?;
        let alternate = self.parse_assignment()?;
        let span = test.span.to(alternate.span);
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        })
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.parse_exponent();
        };
        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = self.peek_binary_op(ops)? {
            self.consume()?;
            let right = self.parse_binary(level + 1)?;
            let span = left.span.to(right.span);
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn peek_binary_op(&mut self, ops: &[(&str, BinaryOp)]) -> Result<Option<BinaryOp>> {
        let lexeme = match self.peek(0)? {
            Some(Token {
                kind: TokenKind::Operator(op),
                ..
            }) => *op,
            Some(Token {
                kind: TokenKind::Ident(word),
                ..
            }) => match word.as_str() {
                "in" => "in",
                "instanceof" => "instanceof",
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(ops
            .iter()
            .find(|(text, _)| *text == lexeme)
            .map(|(_, op)| *op))
    }

    fn parse_exponent(&mut self) -> Result<Expr> {
        let base = self.parse_unary()?;
        if self.eat_operator("**")?.is_none() {
            return Ok(base);
        }
        let exponent = self.parse_exponent()?;
        let span = base.span.to(exponent.span);
        Ok(Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            span,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek(0)?.cloned() else {
            return Err(self.eof("expression"));
        };
        let op = match &token.kind {
            TokenKind::Operator("!") => UnaryOp::Not,
            TokenKind::Operator("-") => UnaryOp::Neg,
            TokenKind::Operator("+") => UnaryOp::Plus,
            TokenKind::Operator("~") => UnaryOp::BitNot,
            TokenKind::Ident(word) if word == "typeof" => UnaryOp::TypeOf,
            TokenKind::Operator(update @ ("++" | "--")) => {
                let op = if *update == "++" {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                self.consume()?;
                let target = self.parse_unary()?;
                let span = token.span.to(target.span);
                return Ok(Expr {
                    kind: ExprKind::Update {
                        target: Box::new(target),
                        op,
                        prefix: true,
                    },
                    span,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.consume()?;
        let operand = self.parse_unary()?;
        let span = token.span.to(operand.span);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let target = self.parse_call_member()?;
        let op = match self.peek_kind(0)? {
            Some(TokenKind::Operator("++")) => UpdateOp::Increment,
            Some(TokenKind::Operator("--")) => UpdateOp::Decrement,
            _ => return Ok(target),
        };
        let token = self.next_required("expression")?;
        let span = target.span.to(token.span);
        Ok(Expr {
            kind: ExprKind::Update {
                target: Box::new(target),
                op,
                prefix: false,
            },
            span,
        })
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let optional = match self.peek_kind(0)? {
                Some(TokenKind::Operator(".")) => false,
                Some(TokenKind::Operator("?.")) => true,
                Some(TokenKind::Operator("[")) => {
                    self.consume()?;
                    let index = self.parse_expr()?;
                    let close = self.expect_operator("]")?;
                    let span = expr.span.to(close.span);
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            property: Property::Computed(Box::new(index)),
                            optional: false,
                        },
                        span,
                    };
                    continue;
                }
                Some(TokenKind::Operator("(")) => {
                    self.consume()?;
                    let (args, close) = self.parse_elements(")")?;
                    let span = expr.span.to(close);
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                    continue;
                }
                _ => break,
            };

            self.consume()?; // `.` or `?.`
            let (property, end) = if optional && self.eat_operator("[")?.is_some() {
                let index = self.parse_expr()?;
                let close = self.expect_operator("]")?;
                (Property::Computed(Box::new(index)), close.span)
            } else {
                let name = self.parse_name()?;
                (Property::Named(name.name), name.span)
            };
            let span = expr.span.to(end);
            expr = Expr {
                kind: ExprKind::Member {
                    object: Box::new(expr),
                    property,
                    optional,
                },
                span,
            };
        }
        Ok(expr)
    }

    fn parse_elements(&mut self, close: &'static str) -> Result<(Vec<Element>, Span)> {
        let mut elements = Vec::new();
        loop {
            if let Some(token) = self.eat_operator(close)? {
                return Ok((elements, token.span));
            }
            let spread = self.eat_operator("...")?.is_some();
            let expr = self.parse_assignment()?;
            elements.push(Element { expr, spread });
            if self.eat_operator(",")?.is_none() {
                let token = self.expect_operator(close)?;
                return Ok((elements, token.span));
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.next_required("expression")?;
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Number(value) => ExprKind::Literal(Literal::Number(value)),
            TokenKind::Str(value) => ExprKind::Literal(Literal::String(value)),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => ExprKind::Literal(Literal::Bool(true)),
                "false" => ExprKind::Literal(Literal::Bool(false)),
                "null" | "undefined" => ExprKind::Literal(Literal::Null),
                _ => ExprKind::Identifier(word),
            },
            TokenKind::Operator("(") => {
                let inner = self.parse_expr()?;
                self.expect_operator(")")?;
                return Ok(inner);
            }
            TokenKind::Operator("[") => {
                let (elements, end) = self.parse_elements("]")?;
                return Ok(Expr {
                    kind: ExprKind::Array(elements),
                    span: span.to(end),
                });
            }
            TokenKind::Operator("{") => return self.parse_object(span),
            _ => {
                return Err(CompileError::new(
                    ErrorKind::UnexpectedToken("expression".to_string()),
                    span,
                ))
            }
        };
        Ok(Expr { kind, span })
    }

    fn parse_object(&mut self, start: Span) -> Result<Expr> {
        let mut entries = Vec::new();
        let end = loop {
            if let Some(token) = self.eat_operator("}")? {
                break token.span;
            }

            if self.eat_operator("...")?.is_some() {
                entries.push(ObjectEntry::Spread(self.parse_assignment()?));
            } else {
                let token = self.next_required("}")?;
                let (key, shorthand) = match token.kind {
                    TokenKind::Ident(name) => (
                        ObjectKey::Named(name.clone()),
                        Some(Expr {
                            kind: ExprKind::Identifier(name),
                            span: token.span,
                        }),
                    ),
                    TokenKind::Str(name) => (ObjectKey::Named(name), None),
                    TokenKind::Operator("[") => {
                        let key = self.parse_expr()?;
                        self.expect_operator("]")?;
                        (ObjectKey::Computed(key), None)
                    }
                    _ => return Err(CompileError::new(ErrorKind::InvalidObjectKey, token.span)),
                };
                let value = match shorthand {
                    Some(value) if !self.is_operator(":")? => value,
                    _ => {
                        self.expect_operator(":")?;
                        self.parse_assignment()?
                    }
                };
                entries.push(ObjectEntry::Property { key, value });
            }

            if self.eat_operator(",")?.is_none() {
                break self.expect_operator("}")?.span;
            }
        };
        Ok(Expr {
            kind: ExprKind::Object(entries),
            span: start.to(end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Document {
        Parser::new(input).parse().unwrap()
    }

    fn error_code(input: &str) -> &'static str {
        Parser::new(input).parse().unwrap_err().code
    }

    fn error(input: &str) -> CompileError {
        Parser::new(input).parse().unwrap_err()
    }

    #[test]
    fn if_chain_structure() {
        let doc = parse("{#if a}A{:else if b}B{:else}C{/if}");
        let Node::If(block) = &doc.nodes[0] else {
            panic!("expected if block, got {:?}", doc.nodes[0]);
        };
        assert_eq!(block.condition.kind, ExprKind::Identifier("a".into()));
        assert_eq!(block.alternates.len(), 2);
        assert!(matches!(block.alternates[0], Alternate::ElseIf { .. }));
        assert!(matches!(block.alternates[1], Alternate::Else { .. }));
    }

    #[test]
    fn each_with_destructuring_and_index() {
        let doc = parse("{#each users as { name, role: r }, i}{name}{/each}");
        let Node::Each(block) = &doc.nodes[0] else {
            panic!("expected each block");
        };
        let Pattern::Object(entries) = &block.item else {
            panic!("expected object pattern");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0.name, "role");
        assert!(matches!(&entries[1].1, Pattern::Ident(id) if id.name == "r"));
        assert_eq!(block.index.as_ref().map(|i| i.name.as_str()), Some("i"));
    }

    #[test]
    fn tags_and_attributes() {
        let doc = parse(r#"<message role="user" hidden data={x}>hi</message>"#);
        let Node::Tag(tag) = &doc.nodes[0] else {
            panic!("expected tag");
        };
        assert_eq!(tag.kind, TagKind::Message(None));
        let names: Vec<_> = tag.attributes.keys().cloned().collect();
        assert_eq!(names, vec!["role", "hidden", "data"]);
        assert_eq!(tag.attributes["hidden"].value, AttributeValue::Flag);
        assert_eq!(tag.children.len(), 1);
    }

    #[test]
    fn operator_precedence() {
        let doc = parse("{a + b * c}");
        let Node::Mustache { expr, .. } = &doc.nodes[0] else {
            panic!("expected mustache");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn config_is_first_node() {
        let doc = parse("---\nmodel: gpt-4o\ntemperature: 0.2\n---\nHello");
        let Node::Config { entries, .. } = &doc.nodes[0] else {
            panic!("expected config node");
        };
        assert_eq!(entries["model"], serde_json::json!("gpt-4o"));
        assert_eq!(entries["temperature"], serde_json::json!(0.2));
    }

    #[test]
    fn elseif_is_always_rejected() {
        assert_eq!(error_code("{#if a}x{:elseif b}y{/if}"), "invalid-elseif");
        assert_eq!(error_code("{:elseif b}"), "invalid-elseif");
    }

    #[test]
    fn else_if_after_unclosed_inner_block_names_it() {
        let err = error("{#if a}{#each xs as x}{:else if b}{/each}{/if}");
        assert_eq!(err.code, "invalid-elseif-placement");
        assert_eq!(
            err.kind,
            ErrorKind::InvalidElseifPlacementUnclosedBlock("{#each}".into())
        );
        let err = error("{#if a}<user>{:else}</user>{/if}");
        assert_eq!(err.kind, ErrorKind::InvalidElsePlacementUnclosedBlock("<user>".into()));
    }

    #[test]
    fn branches_outside_blocks() {
        assert_eq!(
            error("text {:else if x}").kind,
            ErrorKind::InvalidElseifPlacementOutsideIf
        );
        assert_eq!(error("text {:else}").kind, ErrorKind::InvalidElsePlacementOutsideIf);
        assert_eq!(
            error("{#each xs as x}{:else if y}{/each}").kind,
            ErrorKind::InvalidElseifPlacementOutsideIf
        );
    }

    #[test]
    fn structural_errors() {
        assert_eq!(error_code("{#if a}never closed"), "unexpected-eof");
        assert_eq!(error_code("<user>never closed"), "unexpected-eof");
        assert_eq!(error_code("{/if}"), "unexpected-block-close");
        assert_eq!(error_code("{#if a}{/each}"), "unexpected-block-close");
        assert_eq!(error_code("</user>"), "unexpected-tag-close");
        assert_eq!(error_code("<user></assistant>"), "unexpected-tag-close");
        assert_eq!(error_code("{#for x in y}{/for}"), "expected-block-type");
        assert_eq!(error_code("{#each xs as 5}{/each}"), "unexpected-token");
        assert_eq!(error("{#each xs as 5}{/each}").kind, ErrorKind::UnexpectedTokenDestructure);
        assert_eq!(error_code("{#each xs as x, }{/each}"), "expected-name");
        assert_eq!(error_code("{#each xs as {5}}{/each}"), "expected-name");
    }

    #[test]
    fn attribute_errors() {
        assert_eq!(error_code(r#"<user role="a" role="b"></user>"#), "duplicate-attribute");
        assert_eq!(error_code(r#"<user role=>hi</user>"#), "missing-attribute-value");
        assert_eq!(error_code(r#"<ref prompt={p} />"#), "invalid-static-attribute");
        assert_eq!(error_code(r#"<content type={t}>x</content>"#), "invalid-static-attribute");
        let err = error("<user {#if x}a=\"b\"{/if}></user>");
        assert_eq!(err.code, "invalid-logic-block-placement");
        assert_eq!(err.message, "{#if} block cannot be placed inside a tag's attribute list");
    }

    #[test]
    fn invalid_object_key() {
        assert_eq!(error_code("{ {1: 2} }"), "invalid-object-key");
    }

    #[test]
    fn invalid_config() {
        assert_eq!(error_code("---\n- a\n- b\n---\n"), "invalid-config");
    }
}
