/// Every lexical category the lexer can produce. Comments and whitespace are
/// skipped entirely and never reach the token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Illegal,
    Eof,

    Identifier,
    Number,
    String,
    Duration,

    // Punctuation
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    At,

    // Assignment inside label matchers: `job="api"`
    Assign,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    // Comparison
    Eql,
    Neq,
    Lte,
    Lss,
    Gte,
    Gtr,

    // Regex comparison
    EqlRegex,
    NeqRegex,

    // Logical/set keywords
    And,
    Or,
    Unless,

    // Aggregation operator keywords
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Stddev,
    Stdvar,
    Topk,
    Bottomk,
    CountValues,
    Quantile,
    Group,

    // Grouping/modifier keywords
    By,
    Without,
    On,
    Ignoring,
    GroupLeft,
    GroupRight,
    Offset,
    Bool,
}

impl TokenKind {
    /// The keyword this identifier text denotes, if any.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        use TokenKind::*;
        Some(match ident {
            "and" => And,
            "or" => Or,
            "unless" => Unless,
            "sum" => Sum,
            "avg" => Avg,
            "min" => Min,
            "max" => Max,
            "count" => Count,
            "stddev" => Stddev,
            "stdvar" => Stdvar,
            "topk" => Topk,
            "bottomk" => Bottomk,
            "count_values" => CountValues,
            "quantile" => Quantile,
            "group" => Group,
            "by" => By,
            "without" => Without,
            "on" => On,
            "ignoring" => Ignoring,
            "group_left" => GroupLeft,
            "group_right" => GroupRight,
            "offset" => Offset,
            "bool" => Bool,
            _ => return None,
        })
    }

    pub fn is_aggregate_op(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Sum | Avg | Min | Max | Count | Stddev | Stdvar | Topk | Bottomk | CountValues
                | Quantile | Group
        )
    }

    pub fn is_comparison(self) -> bool {
        use TokenKind::*;
        matches!(self, Eql | Neq | Lte | Lss | Gte | Gtr)
    }

    pub fn is_set_op(self) -> bool {
        matches!(self, TokenKind::And | TokenKind::Or | TokenKind::Unless)
    }
}

/// A single lexical token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, col: u32) -> Self {
        Self { kind, text: text.into(), line, col }
    }
}
