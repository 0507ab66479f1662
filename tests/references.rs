use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use promptloom::{compile, CompileContext, ContentBlock, HostError, Message, MessageRole};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("no prompt named '{0}'")]
struct PromptNotFound(String);

/// Context whose resolver serves prompts from an in-memory library.
fn library(prompts: &[(&str, &str)]) -> CompileContext {
    let prompts: Arc<HashMap<String, String>> = Arc::new(
        prompts
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect(),
    );
    CompileContext::new().with_resolver(move |name: String| {
        let prompts = Arc::clone(&prompts);
        async move {
            prompts
                .get(&name)
                .cloned()
                .ok_or_else(|| HostError::from_error(&PromptNotFound(name)))
        }
    })
}

fn text(role: MessageRole, value: &str) -> Message {
    Message::new(role, vec![ContentBlock::text(value)])
}

#[tokio::test]
async fn referenced_messages_are_spliced_in_place() {
    let ctx = library(&[("shared", "Shared rules.")]);
    let source = "Intro\n<user>before</user>\n<ref prompt=\"shared\" />\n<user>after</user>";
    let result = compile(source, &ctx).await.unwrap();
    assert_eq!(
        result.messages,
        vec![
            text(MessageRole::System, "Intro"),
            text(MessageRole::User, "before"),
            text(MessageRole::System, "Shared rules."),
            text(MessageRole::User, "after"),
        ]
    );
}

#[tokio::test]
async fn reference_tag_and_its_alias_splice_the_same_way() {
    let ctx = library(&[("shared", "<assistant>Shared answer.</assistant>")]);
    let source = "<user>q1</user><reference prompt=\"shared\" /><user>q2</user><ref prompt=\"shared\"/>";
    let result = compile(source, &ctx).await.unwrap();
    assert_eq!(
        result.messages,
        vec![
            text(MessageRole::User, "q1"),
            text(MessageRole::Assistant, "Shared answer."),
            text(MessageRole::User, "q2"),
            text(MessageRole::Assistant, "Shared answer."),
        ]
    );
    let err = compile("<reference prompt={p} />", &ctx).await.unwrap_err();
    assert_eq!(err.code, "invalid-static-attribute");
}

#[tokio::test]
async fn references_see_variables_and_extra_attributes() {
    let ctx = library(&[("greet", "<user>Hello {name} from {team}, {count + 1}</user>")])
        .with_var("name", "Ada");
    let source = r#"{#each [1] as n}<ref prompt="greet" team="core" count={n} />{/each}"#;
    let result = compile(source, &ctx).await.unwrap();
    assert_eq!(result.messages, vec![text(MessageRole::User, "Hello Ada from core, 2")]);
}

#[tokio::test]
async fn referenced_config_is_ignored() {
    let ctx = library(&[("child", "---\nmodel: small\n---\nchild text")]);
    let result = compile("---\nmodel: big\n---\n<ref prompt=\"child\" />", &ctx)
        .await
        .unwrap();
    assert_eq!(result.config["model"], serde_json::json!("big"));
    assert_eq!(result.messages, vec![text(MessageRole::System, "child text")]);
}

#[tokio::test]
async fn nested_references_resolve_in_order() {
    let ctx = library(&[
        ("outer", "<user>outer start</user><ref prompt=\"inner\" /><user>outer end</user>"),
        ("inner", "<assistant>inner</assistant>"),
    ]);
    let result = compile("<ref prompt=\"outer\" /><ref prompt=\"inner\" />", &ctx)
        .await
        .unwrap();
    assert_eq!(
        result.messages,
        vec![
            text(MessageRole::User, "outer start"),
            text(MessageRole::Assistant, "inner"),
            text(MessageRole::User, "outer end"),
            text(MessageRole::Assistant, "inner"),
        ]
    );
}

#[tokio::test]
async fn resolver_failures_keep_their_type_name() {
    let ctx = library(&[]);
    let err = compile("<ref prompt=\"missing\" />", &ctx).await.unwrap_err();
    assert_eq!(err.code, "reference-error");
    assert!(err.message.contains("PromptNotFound"), "{}", err.message);
    assert!(err.message.contains("no prompt named 'missing'"), "{}", err.message);
}

#[tokio::test]
async fn compile_errors_in_referenced_prompts_are_wrapped() {
    let ctx = library(&[("broken", "Hello {nobody}")]);
    let err = compile("<ref prompt=\"broken\" />", &ctx).await.unwrap_err();
    assert_eq!(err.code, "reference-error");
    assert!(err.message.contains("variable-not-declared"), "{}", err.message);
}

#[tokio::test]
async fn cycles_are_detected() {
    let ctx = library(&[("a", "<ref prompt=\"b\" />"), ("b", "<ref prompt=\"a\" />")]);
    let err = compile("<ref prompt=\"a\" />", &ctx).await.unwrap_err();
    assert_eq!(err.code, "reference-cycle");
    assert!(err.message.contains("'a'"), "{}", err.message);
}

#[tokio::test]
async fn depth_is_limited() {
    let ctx = library(&[
        ("one", "<ref prompt=\"two\" />"),
        ("two", "<ref prompt=\"three\" />"),
        ("three", "deep"),
    ])
    .with_max_reference_depth(2);
    let err = compile("<ref prompt=\"one\" />", &ctx).await.unwrap_err();
    assert_eq!(err.code, "reference-depth-exceeded");
}

#[tokio::test]
async fn reference_tag_rules() {
    let ctx = library(&[("p", "x")]);
    let code = |source: &'static str| {
        let ctx = ctx.clone();
        async move { compile(source, &ctx).await.unwrap_err().code }
    };
    assert_eq!(code("<user><ref prompt=\"p\" /></user>").await, "invalid-reference-prompt-placement");
    assert_eq!(code("<ref />").await, "reference-tag-without-prompt");
    assert_eq!(code("<ref prompt=\"p\">body</ref>").await, "reference-tag-has-content");
    assert_eq!(code("<ref prompt={p} />").await, "invalid-static-attribute");

    let err = compile("<ref prompt=\"p\" />", &CompileContext::new()).await.unwrap_err();
    assert_eq!(err.code, "missing-reference-function");
}
