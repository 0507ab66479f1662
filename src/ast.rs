use indexmap::IndexMap;

use crate::conversation::MessageRole;
use crate::lexer::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Leading `---` section, already parsed. Only valid as the first node of
    /// a document.
    Config {
        entries: IndexMap<String, serde_json::Value>,
        span: Span,
    },
    Text {
        value: String,
        span: Span,
    },
    Mustache {
        expr: Expr,
        span: Span,
    },
    If(IfBlock),
    Each(EachBlock),
    Tag(Tag),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Config { span, .. } | Node::Text { span, .. } | Node::Mustache { span, .. } => *span,
            Node::If(block) => block.span,
            Node::Each(block) => block.span,
            Node::Tag(tag) => tag.span,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Config { .. } => "Config",
            Node::Text { .. } => "Text",
            Node::Mustache { .. } => "Mustache",
            Node::If(_) => "IfBlock",
            Node::Each(_) => "EachBlock",
            Node::Tag(_) => "Tag",
        }
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text { value, .. } if value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub condition: Expr,
    pub consequent: Vec<Node>,
    pub alternates: Vec<Alternate>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alternate {
    ElseIf { condition: Expr, body: Vec<Node> },
    Else { body: Vec<Node> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EachBlock {
    pub iterable: Expr,
    pub item: Pattern,
    pub index: Option<Ident>,
    pub body: Vec<Node>,
    /// `{:else}` body, used when there is nothing to iterate.
    pub fallback: Option<Vec<Node>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// Binding target of an each block.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(Ident),
    Object(Vec<(Ident, Pattern)>), // { key: pattern }, shorthand binds the key
    Array(Vec<Pattern>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub kind: TagKind,
    pub name: String,
    pub attributes: Attributes,
    pub children: Vec<Node>,
    pub span: Span,
}

pub type Attributes = IndexMap<String, Attribute>;

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub value: AttributeValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Present without a value, as in `<user hidden>`.
    Flag,
    Static(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
}

impl ContentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text" => Some(ContentKind::Text),
            "image" => Some(ContentKind::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// `<message role=...>` carries `None`; role shorthands like `<user>`
    /// carry their role.
    Message(Option<MessageRole>),
    /// `<content type=...>` carries `None`; `<text>` and `<image>` carry
    /// their kind.
    Content(Option<ContentKind>),
    ToolCall,
    Reference,
    Generic,
}

impl TagKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "message" => TagKind::Message(None),
            "content" => TagKind::Content(None),
            "tool-call" => TagKind::ToolCall,
            "reference" | "ref" => TagKind::Reference,
            other => match (other.parse::<MessageRole>(), ContentKind::from_name(other)) {
                (Ok(role), _) => TagKind::Message(Some(role)),
                (_, Some(kind)) => TagKind::Content(Some(kind)),
                _ => TagKind::Generic,
            },
        }
    }

    /// Attributes that may only hold literal text on this tag.
    pub fn static_attributes(&self) -> &'static [&'static str] {
        match self {
            TagKind::Reference => &["prompt"],
            TagKind::Content(None) => &["type"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    Member {
        object: Box<Expr>,
        property: Property,
        optional: bool,
    },
    Array(Vec<Element>),
    Object(Vec<ObjectEntry>),
    Call {
        callee: Box<Expr>,
        args: Vec<Element>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assignment {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
    },
    Update {
        target: Box<Expr>,
        op: UpdateOp,
        prefix: bool,
    },
}

impl Expr {
    /// Assignments and updates are evaluated for their effect and print
    /// nothing.
    pub fn is_side_effect(&self) -> bool {
        matches!(self.kind, ExprKind::Assignment { .. } | ExprKind::Update { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Named(String),
    Computed(Box<Expr>),
}

/// Array element or call argument, optionally spread with `...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub expr: Expr,
    pub spread: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEntry {
    Property { key: ObjectKey, value: Expr },
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Named(String),
    Computed(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Nullish,
    // Parsed so templates get a precise error; never evaluated.
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    InstanceOf,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNotEq => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Nullish => "??",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::In => "in",
            BinaryOp::InstanceOf => "instanceof",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

impl UpdateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOp::Increment => "++",
            UpdateOp::Decrement => "--",
        }
    }
}
