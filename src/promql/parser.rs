use crate::error::Position;
use crate::model::{MatchKind, Matcher};

use super::ast::{
    AggOp, AtModifier, BinModifier, BinaryOp, Cardinality, Expr, Grouping, SelectorModifiers,
    UnaryOp, VectorMatching,
};
use super::lexer::Lexer;
use super::token::{Token, TokenKind};

/// A single accumulated syntax error with its source position.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub pos: Position,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

/// Result of a parse: a best-effort tree plus any errors collected along the
/// way. A non-empty error list invalidates `expr` for evaluation purposes
/// (P2: the parser never throws past its entry point, it returns errors).
pub struct ParseResult {
    pub expr: Option<Expr>,
    pub errors: Vec<ParseError>,
}

/// Binding powers, lowest to highest, per §4.B: `or` < `and`/`unless` <
/// comparisons < `+ -` < `* / %` < `^` (right-assoc) < unary `+ -` <
/// call/index (handled directly in primary parsing, not here).
const PREFIX_BP: u8 = 13;

fn infix_binding_power(op: BinaryOp) -> (u8, u8) {
    use BinaryOp::*;
    match op {
        Or => (1, 2),
        And | Unless => (3, 4),
        Eql | Neq | Lss | Gtr | Lte | Gte => (5, 6),
        Add | Sub => (7, 8),
        Mul | Div | Mod => (9, 10),
        Pow => (12, 11), // right-associative
    }
}

fn token_to_binary_op(kind: TokenKind) -> Option<BinaryOp> {
    use TokenKind as T;
    Some(match kind {
        T::Add => BinaryOp::Add,
        T::Sub => BinaryOp::Sub,
        T::Mul => BinaryOp::Mul,
        T::Div => BinaryOp::Div,
        T::Mod => BinaryOp::Mod,
        T::Pow => BinaryOp::Pow,
        T::Eql => BinaryOp::Eql,
        T::Neq => BinaryOp::Neq,
        T::Lss => BinaryOp::Lss,
        T::Gtr => BinaryOp::Gtr,
        T::Lte => BinaryOp::Lte,
        T::Gte => BinaryOp::Gte,
        T::And => BinaryOp::And,
        T::Or => BinaryOp::Or,
        T::Unless => BinaryOp::Unless,
        _ => return None,
    })
}

fn duration_to_ms(text: &str) -> Option<i64> {
    // Split the trailing alphabetic unit from the leading numeric part. `ms`
    // is tried before `m` by construction of the lexer's token text, so the
    // unit here is unambiguous.
    let split = text.find(|c: char| c.is_ascii_alphabetic())?;
    let (num, unit) = text.split_at(split);
    let n: f64 = num.parse().ok()?;
    let unit_ms: f64 = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        "w" => 604_800_000.0,
        "y" => 31_536_000_000.0,
        _ => return None,
    };
    Some((n * unit_ms) as i64)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        let tokens = Lexer::new(input).tokenize_all();
        Self { tokens, pos: 0, errors: Vec::new() }
    }

    pub fn parse(input: &str) -> ParseResult {
        let mut parser = Parser::new(input);
        let expr = parser.parse_expr(0);
        if parser.peek().kind != TokenKind::Eof {
            let tok = parser.peek().clone();
            parser.error(&tok, format!("unexpected trailing token `{}`", tok.text));
        }
        // A non-empty error list invalidates the tree for evaluation, but the
        // partial tree is still returned (useful for diagnostics/tooling).
        ParseResult { expr, errors: parser.errors }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek2(&self) -> &Token {
        let idx = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            let tok = self.peek().clone();
            self.error(&tok, format!("expected {what}, found `{}`", tok.text));
            None
        }
    }

    fn error(&mut self, tok: &Token, message: String) {
        self.errors.push(ParseError { pos: Position { line: tok.line, col: tok.col }, message });
    }

    fn parse_expr(&mut self, min_bp: u8) -> Option<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some(op) = token_to_binary_op(self.peek().kind) else { break };
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.advance();

            let return_bool = if self.check(TokenKind::Bool) {
                self.advance();
                true
            } else {
                false
            };
            if return_bool && !op.is_comparison() {
                let tok = self.peek().clone();
                self.error(&tok, "bool modifier is only legal on comparison operators".into());
            }

            let matching = self.parse_vector_matching();

            let rhs = self.parse_expr(r_bp)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                modifier: BinModifier { return_bool, matching },
            };
        }

        Some(lhs)
    }

    fn parse_vector_matching(&mut self) -> Option<VectorMatching> {
        let on = if self.check(TokenKind::On) {
            self.advance();
            true
        } else if self.check(TokenKind::Ignoring) {
            self.advance();
            false
        } else {
            return None;
        };
        let labels = self.parse_label_list();
        let card = if self.check(TokenKind::GroupLeft) {
            self.advance();
            let extra = if self.check(TokenKind::LeftParen) { self.parse_label_list() } else { vec![] };
            Cardinality::ManyToOne(extra)
        } else if self.check(TokenKind::GroupRight) {
            self.advance();
            let extra = if self.check(TokenKind::LeftParen) { self.parse_label_list() } else { vec![] };
            Cardinality::OneToMany(extra)
        } else {
            Cardinality::OneToOne
        };
        Some(VectorMatching { on, labels, card })
    }

    fn parse_label_list(&mut self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.expect(TokenKind::LeftParen, "`(`").is_none() {
            return labels;
        }
        if !self.check(TokenKind::RightParen) {
            loop {
                if let Some(tok) = self.expect(TokenKind::Identifier, "label name") {
                    labels.push(tok.text);
                } else {
                    break;
                }
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "`)`");
        labels
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        match self.peek().kind {
            TokenKind::Add => {
                self.advance();
                let e = self.parse_expr(PREFIX_BP)?;
                Some(Expr::Unary { op: UnaryOp::Plus, expr: Box::new(e) })
            }
            TokenKind::Sub => {
                self.advance();
                let e = self.parse_expr(PREFIX_BP)?;
                Some(Expr::Unary { op: UnaryOp::Minus, expr: Box::new(e) })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let expr = match self.peek().kind {
            TokenKind::Number => {
                let tok = self.advance();
                Expr::NumberLiteral(parse_number_literal(&tok.text))
            }
            TokenKind::String => {
                let tok = self.advance();
                Expr::StringLiteral(tok.text)
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr(0)?;
                self.expect(TokenKind::RightParen, "`)`");
                Expr::Paren(Box::new(inner))
            }
            TokenKind::LeftBrace => self.parse_selector(None)?,
            k if k.is_aggregate_op() => self.parse_aggregate()?,
            TokenKind::Identifier => {
                let name = self.advance().text;
                if self.check(TokenKind::LeftParen) {
                    self.parse_call(name)?
                } else {
                    self.parse_selector(Some(name))?
                }
            }
            _ => {
                let tok = self.peek().clone();
                self.error(&tok, format!("unexpected token `{}`", tok.text));
                self.advance();
                return None;
            }
        };
        self.parse_trailer(expr)
    }

    /// After parsing a base expression, attach a matrix-selector/subquery
    /// bracket and/or an `offset`/`@` modifier if present.
    fn parse_trailer(&mut self, expr: Expr) -> Option<Expr> {
        if self.check(TokenKind::LeftBracket) {
            return self.parse_bracket(expr);
        }
        self.attach_modifiers(expr)
    }

    fn parse_bracket(&mut self, expr: Expr) -> Option<Expr> {
        self.advance(); // consume `[`
        let range_tok = self.expect(TokenKind::Duration, "duration")?;
        let range_ms = duration_to_ms(&range_tok.text)?;

        let built = if self.check(TokenKind::Colon) {
            self.advance();
            let resolution_ms = if self.check(TokenKind::Duration) {
                let res_tok = self.advance();
                duration_to_ms(&res_tok.text)
            } else {
                None
            };
            self.expect(TokenKind::RightBracket, "`]`");
            Expr::Subquery {
                expr: Box::new(expr),
                range_ms,
                resolution_ms,
                modifiers: SelectorModifiers::default(),
            }
        } else {
            self.expect(TokenKind::RightBracket, "`]`");
            match expr {
                Expr::VectorSelector { name, matchers, modifiers } => {
                    Expr::MatrixSelector { name, matchers, range_ms, modifiers }
                }
                other => {
                    let tok = self.peek().clone();
                    self.error(&tok, "matrix selector range applied to a non-selector expression".into());
                    other
                }
            }
        };
        self.attach_modifiers(built)
    }

    fn attach_modifiers(&mut self, expr: Expr) -> Option<Expr> {
        let mut offset_ms = None;
        let mut at = None;
        loop {
            if self.check(TokenKind::Offset) {
                self.advance();
                if let Some(tok) = self.expect(TokenKind::Duration, "duration") {
                    offset_ms = duration_to_ms(&tok.text);
                }
            } else if self.check(TokenKind::At) {
                self.advance();
                if let Some(tok) = self.expect(TokenKind::Number, "timestamp") {
                    let secs: f64 = tok.text.parse().unwrap_or(0.0);
                    at = Some(AtModifier((secs * 1000.0) as i64));
                }
            } else {
                break;
            }
        }
        if offset_ms.is_none() && at.is_none() {
            return Some(expr);
        }
        Some(match expr {
            Expr::VectorSelector { name, matchers, mut modifiers } => {
                modifiers.offset_ms = offset_ms.or(modifiers.offset_ms);
                modifiers.at = at.or(modifiers.at);
                Expr::VectorSelector { name, matchers, modifiers }
            }
            Expr::MatrixSelector { name, matchers, range_ms, mut modifiers } => {
                modifiers.offset_ms = offset_ms.or(modifiers.offset_ms);
                modifiers.at = at.or(modifiers.at);
                Expr::MatrixSelector { name, matchers, range_ms, modifiers }
            }
            Expr::Subquery { expr: inner, range_ms, resolution_ms, mut modifiers } => {
                modifiers.offset_ms = offset_ms.or(modifiers.offset_ms);
                modifiers.at = at.or(modifiers.at);
                Expr::Subquery { expr: inner, range_ms, resolution_ms, modifiers }
            }
            other => other,
        })
    }

    fn parse_selector(&mut self, name: Option<String>) -> Option<Expr> {
        let mut matchers = Vec::new();
        if self.check(TokenKind::LeftBrace) {
            self.advance();
            if !self.check(TokenKind::RightBrace) {
                loop {
                    let label_tok = self.expect(TokenKind::Identifier, "label name")?;
                    let kind = match self.peek().kind {
                        TokenKind::Assign => MatchKind::Equal,
                        TokenKind::Neq => MatchKind::NotEqual,
                        TokenKind::EqlRegex => MatchKind::RegexMatch,
                        TokenKind::NeqRegex => MatchKind::RegexNoMatch,
                        _ => {
                            let tok = self.peek().clone();
                            self.error(&tok, format!("expected a matcher operator, found `{}`", tok.text));
                            return None;
                        }
                    };
                    self.advance();
                    let value_tok = self.expect(TokenKind::String, "quoted label value")?;
                    let mut m = Matcher::new(kind, label_tok.text, value_tok.text);
                    let _ = m.compile();
                    matchers.push(m);
                    if self.check(TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RightBrace, "`}`");
        }
        if name.is_none() && matchers.is_empty() {
            let tok = self.peek().clone();
            self.error(&tok, "vector selector must have a metric name or at least one matcher".into());
        }
        Some(Expr::VectorSelector { name, matchers, modifiers: SelectorModifiers::default() })
    }

    fn parse_call(&mut self, name: String) -> Option<Expr> {
        self.advance(); // consume `(`
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                args.push(self.parse_expr(0)?);
                if self.check(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "`)`");
        Some(Expr::Call { func: name, args })
    }

    fn parse_aggregate(&mut self) -> Option<Expr> {
        let op_tok = self.advance();
        let op = token_to_agg_op(op_tok.kind)?;

        let mut grouping = None;
        if self.check(TokenKind::By) || self.check(TokenKind::Without) {
            let without = self.check(TokenKind::Without);
            self.advance();
            let labels = self.parse_label_list();
            grouping = Some(Grouping { labels, without });
        }

        self.expect(TokenKind::LeftParen, "`(`")?;
        let first = self.parse_expr(0)?;
        let (expr, param) = if self.check(TokenKind::Comma) {
            self.advance();
            let second = self.parse_expr(0)?;
            // `topk(k, v)` / `quantile(phi, v)` / `count_values("l", v)`: the
            // parameter comes first, the vector expression second.
            (second, Some(first))
        } else {
            (first, None)
        };
        self.expect(TokenKind::RightParen, "`)`");

        if grouping.is_none() {
            if self.check(TokenKind::By) || self.check(TokenKind::Without) {
                let without = self.check(TokenKind::Without);
                self.advance();
                let labels = self.parse_label_list();
                grouping = Some(Grouping { labels, without });
            }
        }

        Some(Expr::Aggregate {
            op,
            expr: Box::new(expr),
            param: param.map(Box::new),
            grouping: grouping.unwrap_or_default(),
        })
    }
}

fn token_to_agg_op(kind: TokenKind) -> Option<AggOp> {
    use TokenKind as T;
    Some(match kind {
        T::Sum => AggOp::Sum,
        T::Avg => AggOp::Avg,
        T::Min => AggOp::Min,
        T::Max => AggOp::Max,
        T::Count => AggOp::Count,
        T::Stddev => AggOp::Stddev,
        T::Stdvar => AggOp::Stdvar,
        T::Topk => AggOp::Topk,
        T::Bottomk => AggOp::Bottomk,
        T::CountValues => AggOp::CountValues,
        T::Quantile => AggOp::Quantile,
        T::Group => AggOp::Group,
        _ => return None,
    })
}

fn parse_number_literal(text: &str) -> f64 {
    match text.to_ascii_lowercase().as_str() {
        "nan" => f64::NAN,
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        _ => text.parse().unwrap_or(f64::NAN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Expr {
        let result = Parser::parse(input);
        assert!(result.errors.is_empty(), "unexpected errors for `{input}`: {:?}", result.errors.iter().map(|e| &e.message).collect::<Vec<_>>());
        result.expr.unwrap()
    }

    #[test]
    fn parses_plain_selector() {
        let expr = parse_ok(r#"http_requests_total{job="api"}"#);
        match expr {
            Expr::VectorSelector { name, matchers, .. } => {
                assert_eq!(name.as_deref(), Some("http_requests_total"));
                assert_eq!(matchers.len(), 1);
            }
            other => panic!("expected selector, got {other:?}"),
        }
    }

    #[test]
    fn parses_matrix_selector_vs_subquery() {
        let m = parse_ok("foo[5m]");
        assert!(matches!(m, Expr::MatrixSelector { range_ms: 300_000, .. }));

        let sq = parse_ok("foo[5m:1m]");
        match sq {
            Expr::Subquery { range_ms, resolution_ms, .. } => {
                assert_eq!(range_ms, 300_000);
                assert_eq!(resolution_ms, Some(60_000));
            }
            other => panic!("expected subquery, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_before_add() {
        let expr = parse_ok("1 + 2 * 3");
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected top-level add, got {other:?}"),
        }
    }

    #[test]
    fn pow_is_right_associative() {
        // 2^3^2 should parse as 2^(3^2)
        let expr = parse_ok("2^3^2");
        match expr {
            Expr::Binary { op: BinaryOp::Pow, lhs, rhs } => {
                assert!(matches!(*lhs, Expr::NumberLiteral(n) if n == 2.0));
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("expected pow, got {other:?}"),
        }
    }

    #[test]
    fn parses_aggregate_with_by_and_topk_param() {
        let expr = parse_ok("topk(3, sum by (job) (x))");
        match expr {
            Expr::Aggregate { op: AggOp::Topk, param: Some(param), expr: inner, .. } => {
                assert!(matches!(*param, Expr::NumberLiteral(n) if n == 3.0));
                assert!(matches!(*inner, Expr::Aggregate { op: AggOp::Sum, .. }));
            }
            other => panic!("expected topk aggregate, got {other:?}"),
        }
    }

    #[test]
    fn parses_bool_modifier_and_rejects_it_on_arithmetic() {
        let expr = parse_ok("up > bool 0");
        match expr {
            Expr::Binary { modifier, .. } => assert!(modifier.return_bool),
            other => panic!("expected binary, got {other:?}"),
        }

        let result = Parser::parse("up + bool 0");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn parses_group_left_vector_matching() {
        let expr = parse_ok("a * on(method) group_left(handler) b");
        match expr {
            Expr::Binary { modifier, .. } => {
                let matching = modifier.matching.expect("matching clause");
                assert!(matching.on);
                assert_eq!(matching.labels, vec!["method".to_string()]);
                assert!(matches!(matching.card, Cardinality::ManyToOne(ref l) if l == &vec!["handler".to_string()]));
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_yields_errors_not_panic() {
        let result = Parser::parse("sum(");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn subquery_with_offset() {
        let expr = parse_ok("rate(foo[5m])[30m:1m] offset 1m");
        match expr {
            Expr::Subquery { modifiers, .. } => assert_eq!(modifiers.offset_ms, Some(60_000)),
            other => panic!("expected subquery, got {other:?}"),
        }
    }
}
