//! promptloom: compiler for templated LLM prompts.
//!
//! A prompt is plain text with a small template language mixed in. Compiling
//! it against a set of variables yields the conversation a model provider
//! expects: role-tagged messages made of text, image, tool-call and
//! tool-result blocks, plus the configuration declared at the top of the
//! document.
//!
//! Supported syntax:
//! - A leading `---` section with YAML configuration.
//! - `{ expression }` interpolation, with a JavaScript-flavoured expression
//!   language (member access, calls, array/object literals with spreads,
//!   assignment and update operators).
//! - `{#if}` / `{:else if}` / `{:else}` / `{/if}` and
//!   `{#each items as item, index}` / `{:else}` / `{/each}` blocks.
//! - `<message role="...">` and the `<system>`, `<user>`, `<assistant>`,
//!   `<tool>` shorthands; `<content>`, `<text>`, `<image>`; `<tool-call>`.
//! - `<reference prompt="..." />` (or `<ref ... />`), which pulls in another prompt through a host
//!   supplied resolver and splices its messages in place.
//! - `/* comments */` and backslash escapes for literal `{ } < > / * \`.
//!
//! Text outside any message tag is collected into an implicit system
//! message. Compilation is fail-fast: the first problem is returned as a
//! [`CompileError`] with a stable `code`, a message and a source location.
//!
//! ```no_run
//! use promptloom::{compile, CompileContext};
//!
//! # async fn run() -> Result<(), promptloom::CompileError> {
//! let ctx = CompileContext::new().with_var("name", "Ada");
//! let result = compile("<user>Hello {name}!</user>", &ctx).await?;
//! assert_eq!(result.messages.len(), 1);
//! # Ok(())
//! # }
//! ```

mod ast;
mod compiler;
mod config;
mod conversation;
mod error;
mod eval;
mod lexer;
mod parser;
mod reference;
mod scope;
mod value;

use std::fmt;
use std::future::Future;

use indexmap::IndexMap;

pub use ast::*;
pub use conversation::{CompileResult, ContentBlock, Message, MessageRole};
pub use error::{CompileError, ErrorKind, HostError, Result};
pub use lexer::{Span, Token, TokenKind, Tokenizer};
pub use reference::{ReferenceResolver, DEFAULT_MAX_REFERENCE_DEPTH};
pub use value::{Function, Value};

/// Inputs of a compile besides the source: root variables, the reference
/// resolver and how deep references may nest.
#[derive(Clone)]
pub struct CompileContext {
    pub(crate) vars: IndexMap<String, Value>,
    pub(crate) resolver: Option<ReferenceResolver>,
    pub(crate) max_reference_depth: usize,
}

impl CompileContext {
    pub fn new() -> Self {
        Self {
            vars: IndexMap::new(),
            resolver: None,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
        }
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_var(key, value);
        self
    }

    /// Binds a host function callable from expressions.
    pub fn with_function<F>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, HostError> + Send + Sync + 'static,
    {
        self.with_var(key, Value::function(f))
    }

    pub fn with_resolver<F, Fut>(mut self, resolver: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<String, HostError>> + Send + 'static,
    {
        self.resolver = Some(reference::resolver(resolver));
        self
    }

    pub fn with_max_reference_depth(mut self, depth: usize) -> Self {
        self.max_reference_depth = depth;
        self
    }

    pub fn vars(&self) -> &IndexMap<String, Value> {
        &self.vars
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileContext")
            .field("vars", &self.vars)
            .field("resolver", &self.resolver.is_some())
            .field("max_reference_depth", &self.max_reference_depth)
            .finish()
    }
}

/// Parses a document without evaluating it.
pub fn parse(source: &str) -> Result<Document> {
    parser::Parser::new(source).parse()
}

/// Parses a single expression, as written between the braces of a mustache.
pub fn parse_expression(source: &str) -> Result<Expr> {
    parser::Parser::expression(source).parse_expr()
}

/// Compiles `source` into a conversation.
pub async fn compile(source: &str, ctx: &CompileContext) -> Result<CompileResult> {
    tracing::debug!(bytes = source.len(), vars = ctx.vars.len(), "compiling prompt");
    let result = compiler::compile_document(
        source,
        ctx.vars.clone(),
        ctx,
        reference::ReferenceChain::default(),
    )
    .await;
    match &result {
        Ok(compiled) => {
            tracing::debug!(messages = compiled.messages.len(), "prompt compiled")
        }
        Err(err) => tracing::debug!(
            code = err.code,
            line = err.location.line,
            column = err.location.column,
            "prompt failed to compile"
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    fn compile_with(source: &str, ctx: &CompileContext) -> Result<CompileResult> {
        block_on(compile(source, ctx))
    }

    fn messages(source: &str, ctx: &CompileContext) -> Vec<Message> {
        compile_with(source, ctx).unwrap().messages
    }

    fn text(role: MessageRole, value: &str) -> Message {
        Message::new(role, vec![ContentBlock::text(value)])
    }

    #[test]
    fn plain_text_is_a_system_message() {
        let ctx = CompileContext::new();
        assert_eq!(
            messages("  You are a helpful assistant.\n", &ctx),
            vec![text(MessageRole::System, "You are a helpful assistant.")]
        );
        assert_eq!(messages("", &ctx), Vec::<Message>::new());
    }

    #[test]
    fn loose_text_is_flushed_before_messages() {
        let ctx = CompileContext::new().with_var("name", "Ada");
        let source = "Be kind.\n<user>Hi, I am {name}.</user>\nKeep it short.\n<assistant>Hello {name}!</assistant>";
        assert_eq!(
            messages(source, &ctx),
            vec![
                text(MessageRole::System, "Be kind."),
                text(MessageRole::User, "Hi, I am Ada."),
                text(MessageRole::System, "Keep it short."),
                text(MessageRole::Assistant, "Hello Ada!"),
            ]
        );
    }

    #[test]
    fn config_section_is_returned() {
        let ctx = CompileContext::new();
        let result = compile_with("---\nprovider: openai\nmodel: gpt-4o\n---\n<user>hi</user>", &ctx).unwrap();
        assert_eq!(result.config["model"], serde_json::json!("gpt-4o"));
        assert_eq!(result.messages, vec![text(MessageRole::User, "hi")]);
    }

    #[test]
    fn each_concatenates_iterations() {
        let ctx = CompileContext::new().with_var("items", vec!["a", "b"]);
        assert_eq!(
            messages("{#each items as item}{item}{/each}", &ctx),
            vec![text(MessageRole::System, "ab")]
        );
    }

    #[test]
    fn assignments_render_nothing() {
        let ctx = CompileContext::new();
        assert_eq!(
            messages("{count = 1}{count += 1}{count++}{count}", &ctx),
            vec![text(MessageRole::System, "3")]
        );
    }

    #[test]
    fn context_builder_keeps_variables_in_order() {
        let mut ctx = CompileContext::new().with_var("b", 1).with_var("a", "x");
        ctx.set_var("b", true);
        let names: Vec<_> = ctx.vars().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(ctx.vars()["b"], Value::Bool(true));
    }

    #[test]
    fn host_functions() {
        let ctx = CompileContext::new().with_function("shout", |args| {
            Ok(Value::from(args.iter().map(|a| a.render().to_uppercase()).collect::<Vec<_>>().join(" ")))
        });
        assert_eq!(
            messages("{shout('hi', 2)}", &ctx),
            vec![text(MessageRole::System, "HI 2")]
        );
    }

    #[test]
    fn parse_exposes_the_tree() {
        let document = parse("<user>{name}</user>").unwrap();
        assert_eq!(document.nodes.len(), 1);
        assert!(matches!(&document.nodes[0], Node::Tag(tag) if tag.kind == TagKind::Message(Some(MessageRole::User))));

        let expr = parse_expression("user?.name ?? 'anonymous'").unwrap();
        assert!(matches!(expr.kind, ExprKind::Binary { op: BinaryOp::Nullish, .. }));
    }
}
