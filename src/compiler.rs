//! Semantic pass: walks the parsed document, enforces tag placement rules,
//! evaluates expressions in nested scopes and feeds the conversation
//! builder.

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;

use crate::ast::*;
use crate::conversation::{CompileResult, ContentBlock, ConversationBuilder, MessageRole};
use crate::error::{CompileError, ErrorKind, HostError, Result};
use crate::eval::Evaluator;
use crate::lexer::Span;
use crate::parser::Parser;
use crate::reference::ReferenceChain;
use crate::scope::{AlreadyDeclared, ScopeId, ScopeTree};
use crate::value::Value;
use crate::CompileContext;

/// Where the walk currently is, relative to the tags around it.
#[derive(Debug, Clone, Copy, Default)]
struct Placement {
    message: Option<MessageRole>,
    content: bool,
    tool_call: bool,
    in_tag: bool,
}

struct Compiler<'c> {
    source: &'c str,
    ctx: &'c CompileContext,
    chain: ReferenceChain,
    scopes: ScopeTree,
    builder: ConversationBuilder,
    placement: Placement,
}

/// Runs the whole pipeline on one document. Referenced documents come back
/// through here with a longer `chain`.
pub(crate) fn compile_document<'c>(
    source: &'c str,
    vars: IndexMap<String, Value>,
    ctx: &'c CompileContext,
    chain: ReferenceChain,
) -> BoxFuture<'c, Result<CompileResult>> {
    async move {
        let document = Parser::new(source).parse()?;

        let (config, nodes) = match document.nodes.split_first() {
            Some((Node::Config { entries, .. }, rest)) => (entries.clone(), rest),
            _ => (IndexMap::new(), document.nodes.as_slice()),
        };

        let mut compiler = Compiler {
            source,
            ctx,
            chain,
            scopes: ScopeTree::new(vars),
            builder: ConversationBuilder::new(),
            placement: Placement::default(),
        };
        let root = compiler.scopes.root();
        compiler.compile_nodes(nodes, root).await?;

        Ok(CompileResult {
            config,
            messages: compiler.builder.finish(),
        })
    }
    .boxed()
}

fn fail<T>(kind: ErrorKind, span: Span) -> Result<T> {
    Err(CompileError::new(kind, span))
}

fn parse_arguments(text: &str) -> std::result::Result<serde_json::Value, ErrorKind> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str(text) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        _ => Err(ErrorKind::InvalidToolCallArguments),
    }
}

impl<'c> Compiler<'c> {
    fn evaluator(&mut self, scope: ScopeId) -> Evaluator<'_> {
        Evaluator::new(self.source, &mut self.scopes, scope)
    }

    fn compile_nodes<'a>(&'a mut self, nodes: &'a [Node], scope: ScopeId) -> BoxFuture<'a, Result<()>> {
        async move {
            for node in nodes {
                self.compile_node(node, scope).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Compiles `nodes` in a fresh child scope of `parent`.
    async fn compile_branch(&mut self, nodes: &[Node], parent: ScopeId) -> Result<()> {
        let scope = self.scopes.enter(parent);
        let result = self.compile_nodes(nodes, scope).await;
        self.scopes.exit(scope);
        result
    }

    async fn compile_node(&mut self, node: &Node, scope: ScopeId) -> Result<()> {
        match node {
            Node::Text { value, .. } => {
                self.builder.push_text(value);
                Ok(())
            }
            Node::Mustache { expr, .. } => {
                let value = self.evaluator(scope).eval(expr)?;
                if !expr.is_side_effect() {
                    self.builder.push_text(&value.render());
                }
                Ok(())
            }
            Node::If(block) => self.compile_if(block, scope).await,
            Node::Each(block) => self.compile_each(block, scope).await,
            Node::Tag(tag) => self.compile_tag(tag, scope).await,
            Node::Config { span, .. } => fail(
                ErrorKind::UnsupportedBaseNodeType(node.type_name().to_string()),
                *span,
            ),
        }
    }

    async fn compile_if(&mut self, block: &IfBlock, scope: ScopeId) -> Result<()> {
        if self.evaluator(scope).eval(&block.condition)?.is_truthy() {
            return self.compile_branch(&block.consequent, scope).await;
        }
        for alternate in &block.alternates {
            match alternate {
                Alternate::ElseIf { condition, body } => {
                    if self.evaluator(scope).eval(condition)?.is_truthy() {
                        return self.compile_branch(body, scope).await;
                    }
                }
                Alternate::Else { body } => return self.compile_branch(body, scope).await,
            }
        }
        Ok(())
    }

    async fn compile_each(&mut self, block: &EachBlock, scope: ScopeId) -> Result<()> {
        let iterable = self.evaluator(scope).eval(&block.iterable)?;
        let items = match iterable {
            Value::Array(items) if !items.is_empty() => items,
            _ => {
                return match &block.fallback {
                    Some(fallback) => self.compile_branch(fallback, scope).await,
                    None => Ok(()),
                }
            }
        };

        for (index, item) in items.into_iter().enumerate() {
            let iteration = self.scopes.enter(scope);
            let result = match self.bind_iteration(block, iteration, item, index) {
                Ok(()) => self.compile_nodes(&block.body, iteration).await,
                Err(err) => Err(err),
            };
            self.scopes.exit(iteration);
            result?;
        }
        Ok(())
    }

    fn bind_iteration(&mut self, block: &EachBlock, scope: ScopeId, item: Value, index: usize) -> Result<()> {
        self.bind_pattern(&block.item, scope, item)?;
        if let Some(ident) = &block.index {
            self.declare(scope, ident, Value::Number(index as f64))?;
        }
        Ok(())
    }

    fn bind_pattern(&mut self, pattern: &Pattern, scope: ScopeId, value: Value) -> Result<()> {
        match pattern {
            Pattern::Ident(ident) => self.declare(scope, ident, value),
            Pattern::Object(entries) => {
                for (key, binding) in entries {
                    let field = match &value {
                        Value::Object(map) => map.get(&key.name).cloned().unwrap_or_default(),
                        _ => Value::Null,
                    };
                    self.bind_pattern(binding, scope, field)?;
                }
                Ok(())
            }
            Pattern::Array(bindings) => {
                for (position, binding) in bindings.iter().enumerate() {
                    let element = match &value {
                        Value::Array(items) => items.get(position).cloned().unwrap_or_default(),
                        _ => Value::Null,
                    };
                    self.bind_pattern(binding, scope, element)?;
                }
                Ok(())
            }
        }
    }

    fn declare(&mut self, scope: ScopeId, ident: &Ident, value: Value) -> Result<()> {
        self.scopes
            .declare(scope, &ident.name, value)
            .map_err(|AlreadyDeclared| {
                CompileError::new(ErrorKind::VariableAlreadyDeclared(ident.name.clone()), ident.span)
            })
    }

    /// Evaluated attribute value. Flags read as `true`.
    fn attribute(&mut self, tag: &Tag, name: &str, scope: ScopeId) -> Result<Option<Value>> {
        let Some(attribute) = tag.attributes.get(name) else {
            return Ok(None);
        };
        let value = match &attribute.value {
            AttributeValue::Flag => Value::Bool(true),
            AttributeValue::Static(text) => Value::String(text.clone()),
            AttributeValue::Expr(expr) => self.evaluator(scope).eval(expr)?,
        };
        Ok(Some(value))
    }

    /// Attribute rendered as text; a missing or null attribute is `None`.
    fn text_attribute(&mut self, tag: &Tag, name: &str, scope: ScopeId) -> Result<Option<String>> {
        Ok(match self.attribute(tag, name, scope)? {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.render()),
        })
    }

    /// Compiles tag children with `placement` in effect, restoring the
    /// previous placement afterwards.
    async fn compile_children(&mut self, tag: &Tag, placement: Placement, scope: ScopeId) -> Result<()> {
        let previous = std::mem::replace(&mut self.placement, placement);
        let result = self.compile_nodes(&tag.children, scope).await;
        self.placement = previous;
        result
    }

    async fn compile_tag(&mut self, tag: &Tag, scope: ScopeId) -> Result<()> {
        match tag.kind {
            TagKind::Message(role) => self.compile_message(tag, role, scope).await,
            TagKind::Content(kind) => self.compile_content(tag, kind, scope).await,
            TagKind::ToolCall => self.compile_tool_call(tag, scope).await,
            TagKind::Reference => self.compile_reference(tag, scope).await,
            TagKind::Generic => fail(ErrorKind::UnknownTag(tag.name.clone()), tag.span),
        }
    }

    async fn compile_message(&mut self, tag: &Tag, role: Option<MessageRole>, scope: ScopeId) -> Result<()> {
        if self.placement.message.is_some() || self.placement.content {
            return fail(ErrorKind::MessageTagInsideMessage, tag.span);
        }

        let role = match role {
            Some(role) => role,
            None => match self.text_attribute(tag, "role", scope)? {
                Some(role) => role
                    .parse::<MessageRole>()
                    .map_err(|role| CompileError::new(ErrorKind::InvalidMessageRole(role), tag.span))?,
                None => return fail(ErrorKind::MessageTagWithoutRole, tag.span),
            },
        };

        let tool_id = match role {
            MessageRole::Tool => match self.text_attribute(tag, "id", scope)? {
                Some(id) => Some(id),
                None => return fail(ErrorKind::ToolMessageWithoutId, tag.span),
            },
            _ => None,
        };

        self.builder.begin_message(role, tool_id);
        let placement = Placement {
            message: Some(role),
            in_tag: true,
            ..self.placement
        };
        self.compile_children(tag, placement, scope).await?;
        self.builder.end_message();
        Ok(())
    }

    fn content_kind(&self, tag: &Tag) -> Result<ContentKind> {
        let Some(attribute) = tag.attributes.get("type") else {
            return Ok(ContentKind::Text);
        };
        let name = match &attribute.value {
            AttributeValue::Static(name) => name.as_str(),
            _ => "",
        };
        match ContentKind::from_name(name) {
            Some(kind) => Ok(kind),
            None => fail(ErrorKind::InvalidContentType(name.to_string()), attribute.span),
        }
    }

    async fn compile_content(&mut self, tag: &Tag, kind: Option<ContentKind>, scope: ScopeId) -> Result<()> {
        if self.placement.message.is_none() || self.placement.content || self.placement.tool_call {
            return fail(ErrorKind::ContentTagInsideContent, tag.span);
        }
        let kind = match kind {
            Some(kind) => kind,
            None => self.content_kind(tag)?,
        };

        self.builder.flush_text();
        let placement = Placement {
            content: true,
            in_tag: true,
            ..self.placement
        };
        self.compile_children(tag, placement, scope).await?;

        match kind {
            ContentKind::Text => self.builder.flush_text(),
            ContentKind::Image => {
                let url = self.builder.take_text().trim().to_string();
                self.builder.push_block(ContentBlock::Image { url });
            }
        }
        Ok(())
    }

    async fn compile_tool_call(&mut self, tag: &Tag, scope: ScopeId) -> Result<()> {
        if self.placement.content || self.placement.tool_call {
            return fail(ErrorKind::ToolCallTagInsideContent, tag.span);
        }
        if self.placement.message != Some(MessageRole::Assistant) {
            return fail(ErrorKind::InvalidToolCallPlacement, tag.span);
        }
        let Some(id) = self.text_attribute(tag, "id", scope)? else {
            return fail(ErrorKind::ToolCallTagWithoutId, tag.span);
        };
        let Some(name) = self.text_attribute(tag, "name", scope)? else {
            return fail(ErrorKind::ToolCallWithoutName, tag.span);
        };

        self.builder.flush_text();
        let attribute = self.attribute(tag, "arguments", scope)?;
        if attribute.is_some() && tag.children.iter().any(|child| !child.is_blank_text()) {
            return fail(ErrorKind::InvalidToolCallArguments, tag.span);
        }
        let arguments = match attribute {
            Some(value @ Value::Object(_)) => Ok(value.to_json()),
            Some(Value::String(text)) => parse_arguments(&text),
            Some(_) => Err(ErrorKind::InvalidToolCallArguments),
            None => {
                let placement = Placement {
                    tool_call: true,
                    in_tag: true,
                    ..self.placement
                };
                self.compile_children(tag, placement, scope).await?;
                parse_arguments(&self.builder.take_text())
            }
        }
        .map_err(|kind| CompileError::new(kind, tag.span))?;

        self.builder.push_block(ContentBlock::ToolCall {
            id,
            name,
            arguments,
        });
        Ok(())
    }

    async fn compile_reference(&mut self, tag: &Tag, scope: ScopeId) -> Result<()> {
        if self.placement.in_tag {
            return fail(ErrorKind::InvalidReferencePromptPlacement, tag.span);
        }
        let prompt = match tag.attributes.get("prompt").map(|attribute| &attribute.value) {
            Some(AttributeValue::Static(prompt)) => prompt.clone(),
            _ => return fail(ErrorKind::ReferenceTagWithoutPrompt, tag.span),
        };
        if tag.children.iter().any(|child| !child.is_blank_text()) {
            return fail(ErrorKind::ReferenceTagHasContent, tag.span);
        }
        let Some(resolver) = self.ctx.resolver.clone() else {
            return fail(ErrorKind::MissingReferenceFunction, tag.span);
        };
        let chain = self
            .chain
            .enter(&prompt, self.ctx.max_reference_depth)
            .map_err(|kind| CompileError::new(kind, tag.span))?;

        let mut vars = self.scopes.snapshot(scope);
        for name in tag.attributes.keys().filter(|name| *name != "prompt") {
            if let Some(value) = self.attribute(tag, name, scope)? {
                vars.insert(name.clone(), value);
            }
        }

        tracing::debug!(prompt = %prompt, depth = chain.depth(), "resolving reference");
        let source = resolver(prompt.clone()).await.map_err(|err| {
            tracing::debug!(prompt = %prompt, error = %err, "reference resolver failed");
            CompileError::new(ErrorKind::ReferenceError(err), tag.span)
        })?;

        let result = compile_document(&source, vars, self.ctx, chain)
            .await
            .map_err(|err| match err.kind {
                ErrorKind::ReferenceCycle(_) | ErrorKind::ReferenceDepthExceeded(_) => {
                    CompileError::new(err.kind, tag.span)
                }
                _ => {
                    tracing::debug!(prompt = %prompt, code = err.code, "referenced prompt failed to compile");
                    CompileError::new(ErrorKind::ReferenceError(HostError::from(err)), tag.span)
                }
            })?;

        self.builder.extend(result.messages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tool_call_arguments() {
        assert_eq!(parse_arguments("  "), Ok(serde_json::json!({})));
        assert_eq!(parse_arguments(r#"{"q": 1}"#), Ok(serde_json::json!({ "q": 1 })));
        assert_eq!(parse_arguments("[1, 2]"), Err(ErrorKind::InvalidToolCallArguments));
        assert_eq!(parse_arguments("{oops"), Err(ErrorKind::InvalidToolCallArguments));
    }
}
