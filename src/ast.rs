//! Compiled template structures.
//!
//! Everything here is produced once by the compiler and never mutated while
//! rendering, so a single [`crate::Template`] can be rendered any number of
//! times, including from overlapping asynchronous renders.

use std::fmt;

/// A compiled template token.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text, emitted as safe markup.
    Raw(String),
    /// An `{{ expression }}` in reverse polish order.
    Output(Vec<ExprToken>),
    Logic(LogicToken),
}

/// A logic tag together with the tokens of its body.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct LogicToken {
    pub kind: LogicKind,
    pub output: Vec<Token>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParameter {
    pub name: String,
    pub default: Option<Vec<ExprToken>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum LogicKind {
    If {
        condition: Vec<ExprToken>,
    },
    ElseIf {
        condition: Vec<ExprToken>,
    },
    Else,
    For {
        key_var: Option<String>,
        value_var: String,
        expression: Vec<ExprToken>,
        conditional: Option<Vec<ExprToken>>,
    },
    Set {
        key: String,
        expression: Vec<ExprToken>,
    },
    SetCapture {
        key: String,
    },
    Filter {
        filters: Vec<ExprToken>,
    },
    Block {
        name: String,
    },
    ShortBlock {
        name: String,
        expression: Vec<ExprToken>,
    },
    Extends {
        expression: Vec<ExprToken>,
    },
    Use {
        expression: Vec<ExprToken>,
    },
    Include {
        expression: Vec<ExprToken>,
        with: Option<Vec<ExprToken>>,
        only: bool,
        ignore_missing: bool,
    },
    Spaceless,
    Macro {
        name: String,
        parameters: Vec<MacroParameter>,
    },
    Import {
        source: String,
        expression: Vec<ExprToken>,
        alias: String,
    },
    From {
        source: String,
        expression: Vec<ExprToken>,
        names: Vec<(String, String)>,
    },
    Embed {
        expression: Vec<ExprToken>,
        with: Option<Vec<ExprToken>>,
        only: bool,
        ignore_missing: bool,
    },
    With {
        with: Option<Vec<ExprToken>>,
        only: bool,
    },
    Verbatim,
    /// A closing tag such as `endif`. Never emitted into the token tree.
    End(TagType),
    /// A tag registered through [`crate::CustomTag`].
    Custom {
        name: String,
        arguments: Vec<Vec<ExprToken>>,
    },
}

impl LogicKind {
    pub fn tag_type(&self) -> TagType {
        match self {
            Self::If { .. } => TagType::If,
            Self::ElseIf { .. } => TagType::ElseIf,
            Self::Else => TagType::Else,
            Self::For { .. } => TagType::For,
            Self::Set { .. } => TagType::Set,
            Self::SetCapture { .. } => TagType::SetCapture,
            Self::Filter { .. } => TagType::Filter,
            Self::Block { .. } => TagType::Block,
            Self::ShortBlock { .. } => TagType::ShortBlock,
            Self::Extends { .. } => TagType::Extends,
            Self::Use { .. } => TagType::Use,
            Self::Include { .. } => TagType::Include,
            Self::Spaceless => TagType::Spaceless,
            Self::Macro { .. } => TagType::Macro,
            Self::Import { .. } => TagType::Import,
            Self::From { .. } => TagType::From,
            Self::Embed { .. } => TagType::Embed,
            Self::With { .. } => TagType::With,
            Self::Verbatim => TagType::Verbatim,
            Self::End(tag) => tag.clone(),
            Self::Custom { name, .. } => TagType::Custom(name.clone()),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagType {
    If,
    ElseIf,
    Else,
    EndIf,
    For,
    EndFor,
    Set,
    SetCapture,
    EndSet,
    Filter,
    EndFilter,
    Block,
    ShortBlock,
    EndBlock,
    Extends,
    Use,
    Include,
    Spaceless,
    EndSpaceless,
    Macro,
    EndMacro,
    Import,
    From,
    Embed,
    EndEmbed,
    With,
    EndWith,
    Verbatim,
    EndVerbatim,
    Custom(String),
}

impl TagType {
    /// Maps a tag name to its built-in type, or to `Custom` for anything else.
    pub fn named(name: &str) -> Self {
        match name {
            "if" => Self::If,
            "elseif" => Self::ElseIf,
            "else" => Self::Else,
            "endif" => Self::EndIf,
            "for" => Self::For,
            "endfor" => Self::EndFor,
            "set" => Self::Set,
            "setcapture" => Self::SetCapture,
            "endset" => Self::EndSet,
            "filter" => Self::Filter,
            "endfilter" => Self::EndFilter,
            "block" => Self::Block,
            "shortblock" => Self::ShortBlock,
            "endblock" => Self::EndBlock,
            "extends" => Self::Extends,
            "use" => Self::Use,
            "include" => Self::Include,
            "spaceless" => Self::Spaceless,
            "endspaceless" => Self::EndSpaceless,
            "macro" => Self::Macro,
            "endmacro" => Self::EndMacro,
            "import" => Self::Import,
            "from" => Self::From,
            "embed" => Self::Embed,
            "endembed" => Self::EndEmbed,
            "with" => Self::With,
            "endwith" => Self::EndWith,
            "verbatim" => Self::Verbatim,
            "endverbatim" => Self::EndVerbatim,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::If => "if",
            Self::ElseIf => "elseif",
            Self::Else => "else",
            Self::EndIf => "endif",
            Self::For => "for",
            Self::EndFor => "endfor",
            Self::Set => "set",
            Self::SetCapture => "setcapture",
            Self::EndSet => "endset",
            Self::Filter => "filter",
            Self::EndFilter => "endfilter",
            Self::Block => "block",
            Self::ShortBlock => "shortblock",
            Self::EndBlock => "endblock",
            Self::Extends => "extends",
            Self::Use => "use",
            Self::Include => "include",
            Self::Spaceless => "spaceless",
            Self::EndSpaceless => "endspaceless",
            Self::Macro => "macro",
            Self::EndMacro => "endmacro",
            Self::Import => "import",
            Self::From => "from",
            Self::Embed => "embed",
            Self::EndEmbed => "endembed",
            Self::With => "with",
            Self::EndWith => "endwith",
            Self::Verbatim => "verbatim",
            Self::EndVerbatim => "endverbatim",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled expression token. Expressions are stored in reverse polish
/// order; grouped sub-lists (parameters, bracket keys) nest.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ExprToken {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    /// `_context`
    Context,
    Variable(String),
    KeyPeriod(String),
    KeyBrackets {
        key: Vec<ExprToken>,
        params: Option<Vec<ExprToken>>,
    },
    Filter {
        name: String,
        params: Option<Vec<ExprToken>>,
    },
    Function {
        name: String,
        params: Option<Vec<ExprToken>>,
    },
    Test {
        name: String,
        negated: bool,
        params: Option<Vec<ExprToken>>,
    },
    Operator(Operator),
    ObjectKey(ObjectKey),
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    ParameterStart,
    SubexpressionStart,
    /// A parenthesised group that did not attach to a call.
    ParameterEnd(Vec<ExprToken>),
    SubexpressionEnd(Vec<ExprToken>),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
    },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Name(String),
    Expression(Vec<ExprToken>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Range,
    /// `?`; `has_else` is set once a matching `:` is compiled.
    Conditional {
        has_else: bool,
    },
    /// `?:`
    Elvis,
    /// `??`
    NullCoalesce,
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Matches,
    StartsWith,
    EndsWith,
    Concat,
    Add,
    Subtract,
    FloorDivide,
    Power,
    Multiply,
    Divide,
    Modulo,
    Not,
}
