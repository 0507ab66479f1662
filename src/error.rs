//! Error catalog.
//!
//! Every failure the compiler can report is an [`ErrorKind`]. The kind maps
//! to a stable `code` that callers match on, and renders a message meant for
//! the template author. Messages are not a contract and must not be parsed.

use std::any::type_name;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::lexer::Span;

/// A failure raised by host code: a function bound in the variables or the
/// reference resolver. `name` identifies the kind of failure (usually the
/// error's type name) and survives wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct HostError {
    pub name: String,
    pub message: String,
}

impl HostError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Captures the short type name and display text of any error.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let full = type_name::<E>();
        let path = full.split('<').next().unwrap_or(full);
        let name = path.rsplit("::").next().unwrap_or(path);
        Self::new(name, err.to_string())
    }
}

impl From<CompileError> for HostError {
    fn from(err: CompileError) -> Self {
        Self::new("CompileError", format!("[{}] {}", err.code, err.message))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    // Structural
    UnexpectedEofToken(String),
    UnexpectedToken(String),
    UnexpectedBlockClose,
    InvalidElseif,
    InvalidElseifPlacementUnclosedBlock(String),
    InvalidElseifPlacementOutsideIf,
    InvalidElsePlacementUnclosedBlock(String),
    InvalidElsePlacementOutsideIf,
    ExpectedBlockType,
    UnexpectedTokenDestructure,
    ExpectedName,
    UnexpectedMustacheCloseTag,
    UnclosedComment,
    UnexpectedEndOfComment,
    InvalidTagName,
    DuplicateAttribute,
    UnclosedAttributeValue(String),
    MissingAttributeValue,
    InvalidLogicBlockPlacement { location: String, name: String },
    InvalidConfig(String),
    UnexpectedTagClose(String),
    InvalidStaticAttribute(String),

    // Semantic
    UnsupportedBaseNodeType(String),
    VariableAlreadyDeclared(String),
    InvalidObjectKey,
    UnsupportedOperator(String),
    InvalidAssignment,
    UnknownTag(String),
    InvalidToolCallPlacement,
    MessageTagInsideMessage,
    ContentTagInsideContent,
    ToolCallTagInsideContent,
    ToolCallTagWithoutId,
    ToolMessageWithoutId,
    ToolCallWithoutName,
    InvalidToolCallArguments,
    MessageTagWithoutRole,
    InvalidContentType(String),
    InvalidReferencePromptPlacement,
    ReferenceTagWithoutPrompt,
    MissingReferenceFunction,
    ReferenceError(HostError),
    ReferenceCycle(String),
    ReferenceDepthExceeded(usize),
    ReferenceTagHasContent,

    // Evaluation
    InvalidMessageRole(String),
    VariableNotDeclared(String),
    InvalidSpreadInArray(String),
    InvalidSpreadInObject(String),
    InvalidUpdate { operation: String, value_type: String },
    PropertyNotExists(String),
    NotAFunction(String),
    FunctionCallError(HostError),
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            UnexpectedEofToken(_) => "unexpected-eof",
            UnexpectedToken(_) | UnexpectedTokenDestructure => "unexpected-token",
            UnexpectedBlockClose => "unexpected-block-close",
            InvalidElseif => "invalid-elseif",
            InvalidElseifPlacementUnclosedBlock(_) | InvalidElseifPlacementOutsideIf => {
                "invalid-elseif-placement"
            }
            InvalidElsePlacementUnclosedBlock(_) | InvalidElsePlacementOutsideIf => {
                "invalid-else-placement"
            }
            ExpectedBlockType => "expected-block-type",
            ExpectedName => "expected-name",
            UnexpectedMustacheCloseTag => "unexpected-mustache-close-tag",
            UnclosedComment => "unclosed-comment",
            UnexpectedEndOfComment => "unexpected-end-of-comment",
            InvalidTagName => "invalid-tag-name",
            DuplicateAttribute => "duplicate-attribute",
            UnclosedAttributeValue(_) => "unclosed-attribute-value",
            MissingAttributeValue => "missing-attribute-value",
            InvalidLogicBlockPlacement { .. } => "invalid-logic-block-placement",
            InvalidConfig(_) => "invalid-config",
            UnexpectedTagClose(_) => "unexpected-tag-close",
            InvalidStaticAttribute(_) => "invalid-static-attribute",
            UnsupportedBaseNodeType(_) => "unsupported-base-node-type",
            VariableAlreadyDeclared(_) => "variable-already-declared",
            InvalidObjectKey => "invalid-object-key",
            UnsupportedOperator(_) => "unsupported-operator",
            InvalidAssignment => "invalid-assignment",
            UnknownTag(_) => "unknown-tag",
            InvalidToolCallPlacement => "invalid-tool-call-placement",
            MessageTagInsideMessage => "message-tag-inside-message",
            ContentTagInsideContent => "content-tag-inside-content",
            ToolCallTagInsideContent => "tool-call-tag-inside-content",
            ToolCallTagWithoutId => "tool-call-tag-without-id",
            ToolMessageWithoutId => "tool-message-without-id",
            ToolCallWithoutName => "tool-call-without-name",
            InvalidToolCallArguments => "invalid-tool-call-arguments",
            MessageTagWithoutRole => "message-tag-without-role",
            InvalidContentType(_) => "invalid-content-type",
            InvalidReferencePromptPlacement => "invalid-reference-prompt-placement",
            ReferenceTagWithoutPrompt => "reference-tag-without-prompt",
            MissingReferenceFunction => "missing-reference-function",
            ReferenceError(_) => "reference-error",
            ReferenceCycle(_) => "reference-cycle",
            ReferenceDepthExceeded(_) => "reference-depth-exceeded",
            ReferenceTagHasContent => "reference-tag-has-content",
            InvalidMessageRole(_) => "invalid-message-role",
            VariableNotDeclared(_) => "variable-not-declared",
            InvalidSpreadInArray(_) => "invalid-spread-in-array",
            InvalidSpreadInObject(_) => "invalid-spread-in-object",
            InvalidUpdate { .. } => "invalid-update",
            PropertyNotExists(_) => "property-not-exists",
            NotAFunction(_) => "not-a-function",
            FunctionCallError(_) => "function-call-error",
        }
    }

    pub fn message(&self) -> String {
        use ErrorKind::*;
        match self {
            UnexpectedEofToken(token) => format!("Unexpected end of input, expected '{token}'"),
            UnexpectedToken(token) => format!("Expected '{token}'"),
            UnexpectedBlockClose => "Unexpected block closing tag".to_string(),
            InvalidElseif => "'elseif' should be 'else if'".to_string(),
            InvalidElseifPlacementUnclosedBlock(block) => {
                format!("Expected to close {block} before seeing {{:else if ...}} block")
            }
            InvalidElseifPlacementOutsideIf => {
                "Cannot have an {:else if ...} block outside an {#if ...} block".to_string()
            }
            InvalidElsePlacementUnclosedBlock(block) => {
                format!("Expected to close {block} before seeing {{:else}} block")
            }
            InvalidElsePlacementOutsideIf => {
                "Cannot have an {:else} block outside an {#if ...} or {#each ...} block".to_string()
            }
            ExpectedBlockType => "Expected if or each".to_string(),
            UnexpectedTokenDestructure => "Expected identifier or destructure pattern".to_string(),
            ExpectedName => "Expected name".to_string(),
            UnexpectedMustacheCloseTag => {
                "Unexpected closing tag without matching opening tag".to_string()
            }
            UnclosedComment => "Unclosed comment".to_string(),
            UnexpectedEndOfComment => "Unexpected end of comment".to_string(),
            InvalidTagName => "Expected valid tag name".to_string(),
            DuplicateAttribute => "Attributes need to be unique".to_string(),
            UnclosedAttributeValue(token) => {
                format!("Expected to close the attribute value with {token}")
            }
            MissingAttributeValue => "Expected value for the attribute".to_string(),
            InvalidLogicBlockPlacement { location, name } => {
                format!("{{#{name}}} block cannot be {location}")
            }
            InvalidConfig(message) => format!("Invalid config: {message}"),
            UnexpectedTagClose(name) => format!("Unexpected closing tag for {name}"),
            InvalidStaticAttribute(name) => {
                format!("The attribute '{name}' must only contain literal values")
            }
            UnsupportedBaseNodeType(kind) => format!("Unsupported base node type: {kind}"),
            VariableAlreadyDeclared(name) => format!("Variable '{name}' is already declared"),
            InvalidObjectKey => "Invalid object key".to_string(),
            UnsupportedOperator(op) => format!("Unsupported operator: {op}"),
            InvalidAssignment => "Invalid assignment".to_string(),
            UnknownTag(name) => format!("Unknown tag: '{name}'"),
            InvalidToolCallPlacement => {
                "All tool calls must be inside of an assistant message".to_string()
            }
            MessageTagInsideMessage => {
                "Message tags cannot be inside of another message".to_string()
            }
            ContentTagInsideContent => "Content tags must be directly inside message tags".to_string(),
            ToolCallTagInsideContent => "Tool calls must be directly inside message tags".to_string(),
            ToolCallTagWithoutId => "Tool call tags must have an id attribute".to_string(),
            ToolMessageWithoutId => "Tool messages must have an id attribute".to_string(),
            ToolCallWithoutName => "Tool calls must have a name attribute".to_string(),
            InvalidToolCallArguments => {
                "Tool calls must contain a valid JSON object as arguments".to_string()
            }
            MessageTagWithoutRole => "Message tags must have a role attribute".to_string(),
            InvalidContentType(kind) => format!("Invalid content type: {kind}"),
            InvalidReferencePromptPlacement => {
                "Reference tags must not be inside of other tags".to_string()
            }
            ReferenceTagWithoutPrompt => "Reference tags must have a prompt attribute".to_string(),
            MissingReferenceFunction => "A reference function was not provided".to_string(),
            ReferenceError(err) => format!(
                "There was an error referencing the prompt: \n{} {}",
                err.name, err.message
            ),
            ReferenceCycle(prompt) => {
                format!("Prompt '{prompt}' references itself through a reference cycle")
            }
            ReferenceDepthExceeded(max) => {
                format!("References are nested deeper than the allowed {max} levels")
            }
            ReferenceTagHasContent => "Reference tags cannot have content".to_string(),
            InvalidMessageRole(role) => format!("Invalid message role: {role}"),
            VariableNotDeclared(name) => format!("Variable '{name}' is not declared"),
            InvalidSpreadInArray(element) => format!("Element '{element}' is not iterable"),
            InvalidSpreadInObject(property) => {
                format!("Property '{property}' is not valid for spreading")
            }
            InvalidUpdate {
                operation,
                value_type,
            } => format!("Cannot use {operation} operation on {value_type}"),
            PropertyNotExists(property) => format!("Property '{property}' does not exist on object"),
            NotAFunction(kind) => format!("'{kind}' is not a function"),
            FunctionCallError(err) => {
                format!("Error calling function: \n{} {}", err.name, err.message)
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// The single error a failed compile returns.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message} ({code}) at line {}, column {}", .location.line, .location.column)]
pub struct CompileError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub location: Span,
}

impl CompileError {
    pub fn new(kind: ErrorKind, location: Span) -> Self {
        Self {
            code: kind.code(),
            message: kind.message(),
            kind,
            location,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
