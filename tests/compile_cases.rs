use pretty_assertions::assert_eq;
use promptloom::{compile, CompileContext, CompileError, CompileResult, ContentBlock, Message, MessageRole, Value};
use serde_json::json;

async fn run(source: &str, ctx: &CompileContext) -> Result<CompileResult, CompileError> {
    compile(source, ctx).await
}

async fn messages(source: &str, ctx: &CompileContext) -> Vec<Message> {
    run(source, ctx).await.unwrap().messages
}

async fn error(source: &str, ctx: &CompileContext) -> CompileError {
    run(source, ctx).await.unwrap_err()
}

async fn code(source: &str) -> &'static str {
    error(source, &CompileContext::new()).await.code
}

fn text(role: MessageRole, value: &str) -> Message {
    Message::new(role, vec![ContentBlock::text(value)])
}

// ── Control flow ──

#[tokio::test]
async fn if_chain_runs_exactly_one_branch() {
    let source = "{#if n > 1}big{:else if n > 0}small{:else}none{/if}";
    for (n, expected) in [(2, "big"), (1, "small"), (0, "none")] {
        let ctx = CompileContext::new().with_var("n", n);
        assert_eq!(messages(source, &ctx).await, vec![text(MessageRole::System, expected)]);
    }
}

#[tokio::test]
async fn each_concatenates_in_order() {
    let ctx = CompileContext::new().with_var("items", vec!["a", "b"]);
    assert_eq!(
        messages("{#each items as item}{item}{/each}", &ctx).await,
        vec![text(MessageRole::System, "ab")]
    );
}

#[tokio::test]
async fn each_destructures_with_index() {
    let ctx = CompileContext::new().with_var(
        "users",
        Value::from(json!([{ "name": "Ada", "role": "admin" }, { "name": "Bob", "role": "user" }])),
    );
    let source = "{#each users as { name, role: kind }, i}{i}:{name}({kind}) {/each}";
    assert_eq!(
        messages(source, &ctx).await,
        vec![text(MessageRole::System, "0:Ada(admin) 1:Bob(user)")]
    );

    let ctx = CompileContext::new().with_var("pairs", Value::from(json!([["a", 1], ["b", 2]])));
    assert_eq!(
        messages("{#each pairs as [key, value]}{key}={value};{/each}", &ctx).await,
        vec![text(MessageRole::System, "a=1;b=2;")]
    );
}

#[tokio::test]
async fn each_else_runs_for_empty_or_non_arrays() {
    let source = "{#each xs as x}{x}{:else}nothing{/each}";
    let empty = CompileContext::new().with_var("xs", Vec::<Value>::new());
    assert_eq!(messages(source, &empty).await, vec![text(MessageRole::System, "nothing")]);
    let scalar = CompileContext::new().with_var("xs", 3);
    assert_eq!(messages(source, &scalar).await, vec![text(MessageRole::System, "nothing")]);
}

#[tokio::test]
async fn loop_bindings_do_not_leak() {
    let ctx = CompileContext::new().with_var("xs", vec![1, 2]);
    let err = error("{#each xs as x}{x}{/each}{x}", &ctx).await;
    assert_eq!(err.code, "variable-not-declared");
}

#[tokio::test]
async fn state_carries_across_iterations() {
    let ctx = CompileContext::new().with_var("xs", vec![1, 2, 3]);
    let source = "{total = 0}{#each xs as x}{total += x}{/each}Total: {total}";
    assert_eq!(messages(source, &ctx).await, vec![text(MessageRole::System, "Total: 6")]);
}

// ── Structural errors ──

#[tokio::test]
async fn else_if_after_unclosed_block_names_it() {
    let err = error("{#if a}{#each xs as x}{:else if b}{/each}{/if}", &CompileContext::new()).await;
    assert_eq!(err.code, "invalid-elseif-placement");
    assert!(err.message.contains("{#each}"), "{}", err.message);
}

#[tokio::test]
async fn elseif_spelling_is_rejected() {
    assert_eq!(code("{#if a}x{:elseif b}y{/if}").await, "invalid-elseif");
}

#[tokio::test]
async fn duplicate_attributes_on_any_tag() {
    assert_eq!(code(r#"<message role="a" role="b">x</message>"#).await, "duplicate-attribute");
    assert_eq!(code(r#"<widget size="1" size="2" />"#).await, "duplicate-attribute");
}

#[tokio::test]
async fn lexical_errors() {
    assert_eq!(code("text /* never closed").await, "unclosed-comment");
    assert_eq!(code("oops */").await, "unexpected-end-of-comment");
    assert_eq!(code("stray } brace").await, "unexpected-mustache-close-tag");
    assert_eq!(code(r#"<user role="x>hi</user>"#).await, "unclosed-attribute-value");
    assert_eq!(code("---\nmodel: a\n").await, "invalid-config");
}

#[tokio::test]
async fn errors_carry_locations() {
    let err = error("line one\n  {y}", &CompileContext::new()).await;
    assert_eq!(err.code, "variable-not-declared");
    assert_eq!((err.location.line, err.location.column), (2, 4));
}

// ── Tag rules ──

#[tokio::test]
async fn message_roles() {
    assert_eq!(code("<message>hi</message>").await, "message-tag-without-role");
    assert_eq!(code(r#"<message role="bogus">hi</message>"#).await, "invalid-message-role");

    let ctx = CompileContext::new().with_var("who", "assistant");
    assert_eq!(
        messages("<message role={who}>ok</message>", &ctx).await,
        vec![text(MessageRole::Assistant, "ok")]
    );
}

#[tokio::test]
async fn message_nesting() {
    assert_eq!(code("<user><assistant>x</assistant></user>").await, "message-tag-inside-message");
    assert_eq!(code("<user><content><text>x</text></content></user>").await, "content-tag-inside-content");
    assert_eq!(code("<user><widget /></user>").await, "unknown-tag");
    for floating in ["<content>x</content>", "<text>x</text>", "<image>u</image>", "{#if true}<text>x</text>{/if}"] {
        assert_eq!(code(floating).await, "content-tag-inside-content", "{floating}");
    }
}

#[tokio::test]
async fn tool_call_rules() {
    assert_eq!(code(r#"<assistant><tool-call name="x" /></assistant>"#).await, "tool-call-tag-without-id");
    assert_eq!(code(r#"<assistant><tool-call id="1" /></assistant>"#).await, "tool-call-without-name");
    assert_eq!(
        code(r#"<assistant><tool-call id="1" name="x">not json</tool-call></assistant>"#).await,
        "invalid-tool-call-arguments"
    );
    assert_eq!(
        code(r#"<assistant><tool-call id="1" name="x" arguments={{ a: 1 }}>\{"b": 2\}</tool-call></assistant>"#).await,
        "invalid-tool-call-arguments"
    );
    assert_eq!(
        code(r#"<user><tool-call id="1" name="x" /></user>"#).await,
        "invalid-tool-call-placement"
    );
    assert_eq!(
        code(r#"<assistant><content><tool-call id="1" name="x" /></content></assistant>"#).await,
        "tool-call-tag-inside-content"
    );
}

#[tokio::test]
async fn tool_calls_and_results() {
    let ctx = CompileContext::new().with_var("query", "rust");
    let source = r#"
<assistant>
  Let me check.
  <tool-call id="c1" name="search" arguments={{ q: query }} />
  <tool-call id="c2" name="calc">\{"expr": "1+1"\}</tool-call>
  <tool-call id="c3" name="now" />
</assistant>
<tool id="c1">Rust is a language.</tool>
"#;
    assert_eq!(
        messages(source, &ctx).await,
        vec![
            Message::new(
                MessageRole::Assistant,
                vec![
                    ContentBlock::text("Let me check."),
                    ContentBlock::ToolCall {
                        id: "c1".into(),
                        name: "search".into(),
                        arguments: json!({ "q": "rust" }),
                    },
                    ContentBlock::ToolCall {
                        id: "c2".into(),
                        name: "calc".into(),
                        arguments: json!({ "expr": "1+1" }),
                    },
                    ContentBlock::ToolCall {
                        id: "c3".into(),
                        name: "now".into(),
                        arguments: json!({}),
                    },
                ]
            ),
            Message::new(
                MessageRole::Tool,
                vec![ContentBlock::ToolResult {
                    id: "c1".into(),
                    value: "Rust is a language.".into(),
                }]
            ),
        ]
    );
}

#[tokio::test]
async fn tool_message_needs_id() {
    assert_eq!(code("<tool>42</tool>").await, "tool-message-without-id");
}

#[tokio::test]
async fn content_blocks() {
    let source = "<user><text>Look at this:</text><image>https://example.com/cat.png</image></user>";
    assert_eq!(
        messages(source, &CompileContext::new()).await,
        vec![Message::new(
            MessageRole::User,
            vec![
                ContentBlock::text("Look at this:"),
                ContentBlock::Image {
                    url: "https://example.com/cat.png".into()
                },
            ]
        )]
    );
    assert_eq!(
        code(r#"<user><content type="video">x</content></user>"#).await,
        "invalid-content-type"
    );
}

// ── Expressions ──

#[tokio::test]
async fn spread_of_non_iterable_names_the_operand() {
    let ctx = CompileContext::new().with_var("x", 5);
    let err = error("{[...x]}", &ctx).await;
    assert_eq!(err.code, "invalid-spread-in-array");
    assert!(err.message.contains("'x'"), "{}", err.message);
}

#[tokio::test]
async fn undeclared_variable_is_named() {
    let err = error("Hello {y}", &CompileContext::new()).await;
    assert_eq!(err.code, "variable-not-declared");
    assert!(err.message.contains("'y'"), "{}", err.message);
}

#[tokio::test]
async fn repeated_loop_variable() {
    let ctx = CompileContext::new().with_var("xs", vec![1]);
    let err = error("{#each xs as x, x}{x}{/each}", &ctx).await;
    assert_eq!(err.code, "variable-already-declared");
}

#[tokio::test]
async fn value_rendering() {
    let ctx = CompileContext::new();
    let source = "{ {a: 1, b: [true, null]} } {null}|{1.5}|{10 / 4}|{'x'.length}";
    assert_eq!(
        messages(source, &ctx).await,
        vec![text(MessageRole::System, r#"{"a":1,"b":[true,null]} |1.5|2.5|1"#)]
    );
}

#[tokio::test]
async fn host_function_failures_keep_their_name() {
    let ctx = CompileContext::new().with_function("lookup", |_| {
        Err(promptloom::HostError::new("KeyError", "no such key"))
    });
    let err = error("{lookup('k')}", &ctx).await;
    assert_eq!(err.code, "function-call-error");
    assert!(err.message.contains("KeyError no such key"), "{}", err.message);
}

// ── Output ──

#[tokio::test]
async fn comments_and_escapes() {
    let source = r"Hello /* hidden */world \{literal\} \<b\>";
    assert_eq!(
        messages(source, &CompileContext::new()).await,
        vec![text(MessageRole::System, "Hello world {literal} <b>")]
    );
}

#[tokio::test]
async fn result_serializes_for_providers() {
    let result = run("---\ntemperature: 0\n---\n<user>hi</user>", &CompileContext::new())
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({
            "config": { "temperature": 0 },
            "messages": [{ "role": "user", "content": [{ "type": "text", "value": "hi" }] }]
        })
    );
}
