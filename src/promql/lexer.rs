use super::token::{Token, TokenKind};

/// Tokenizes PromQL source into a finite stream with line/column positions.
///
/// Whitespace (including newlines) and `#`-to-end-of-line comments are
/// skipped transparently; they never produce tokens. On an unterminated
/// string, an illegal character, or a truncated operator (`!` not followed
/// by `=`/`~`), [`Lexer::next_token`] returns an `Illegal` token carrying the
/// offending text rather than failing — the parser is responsible for
/// turning that into a syntax error.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    read_position: usize,
    ch: Option<char>,
    line: u32,
    col: u32,
}

const DURATION_UNITS: &[&str] = &["ms", "s", "m", "h", "d", "w", "y"];

impl Lexer {
    pub fn new(input: &str) -> Self {
        let mut lexer = Self {
            input: input.chars().collect(),
            position: 0,
            read_position: 0,
            ch: None,
            line: 1,
            col: 0,
        };
        lexer.read_char();
        lexer
    }

    fn read_char(&mut self) {
        if let Some(c) = self.ch {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            }
        }
        self.ch = self.input.get(self.read_position).copied();
        self.position = self.read_position;
        self.read_position += 1;
        if self.ch.is_some() {
            self.col += 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.read_position).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.ch {
                Some(c) if c.is_whitespace() => self.read_char(),
                Some('#') => {
                    while let Some(c) = self.ch {
                        if c == '\n' {
                            break;
                        }
                        self.read_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn make(&self, kind: TokenKind, text: String, line: u32, col: u32) -> Token {
        Token::new(kind, text, line, col)
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        let (line, col) = (self.line, self.col);

        let Some(c) = self.ch else {
            return self.make(TokenKind::Eof, String::new(), line, col);
        };

        if c.is_ascii_digit() || (c == '.' && self.peek_char().is_some_and(|n| n.is_ascii_digit()))
        {
            return self.read_number(line, col);
        }

        if c.is_ascii_alphabetic() || c == '_' {
            return self.read_identifier(line, col);
        }

        if c == '"' || c == '\'' || c == '`' {
            return self.read_string(c, line, col);
        }

        let tok = match c {
            '(' => self.single(TokenKind::LeftParen, line, col),
            ')' => self.single(TokenKind::RightParen, line, col),
            '{' => self.single(TokenKind::LeftBrace, line, col),
            '}' => self.single(TokenKind::RightBrace, line, col),
            '[' => self.single(TokenKind::LeftBracket, line, col),
            ']' => self.single(TokenKind::RightBracket, line, col),
            ',' => self.single(TokenKind::Comma, line, col),
            ':' => self.single(TokenKind::Colon, line, col),
            '@' => self.single(TokenKind::At, line, col),
            '+' => self.single(TokenKind::Add, line, col),
            '-' => self.single(TokenKind::Sub, line, col),
            '*' => self.single(TokenKind::Mul, line, col),
            '/' => self.single(TokenKind::Div, line, col),
            '%' => self.single(TokenKind::Mod, line, col),
            '^' => self.single(TokenKind::Pow, line, col),
            '=' => {
                if self.peek_char() == Some('=') {
                    self.read_char();
                    self.single(TokenKind::Eql, line, col)
                } else if self.peek_char() == Some('~') {
                    self.read_char();
                    self.single(TokenKind::EqlRegex, line, col)
                } else {
                    self.single(TokenKind::Assign, line, col)
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.read_char();
                    self.single(TokenKind::Neq, line, col)
                } else if self.peek_char() == Some('~') {
                    self.read_char();
                    self.single(TokenKind::NeqRegex, line, col)
                } else {
                    self.read_char();
                    self.make(TokenKind::Illegal, "!".to_string(), line, col)
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.read_char();
                    self.single(TokenKind::Lte, line, col)
                } else {
                    self.single(TokenKind::Lss, line, col)
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.read_char();
                    self.single(TokenKind::Gte, line, col)
                } else {
                    self.single(TokenKind::Gtr, line, col)
                }
            }
            other => {
                self.read_char();
                self.make(TokenKind::Illegal, other.to_string(), line, col)
            }
        };
        tok
    }

    /// Consume the current char as a one-character token of `kind`.
    fn single(&mut self, kind: TokenKind, line: u32, col: u32) -> Token {
        let text = self.ch.map(|c| c.to_string()).unwrap_or_default();
        self.read_char();
        self.make(kind, text, line, col)
    }

    fn read_identifier(&mut self, line: u32, col: u32) -> Token {
        let start = self.position;
        while let Some(c) = self.ch {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                self.read_char();
            } else {
                break;
            }
        }
        let text: String = self.input[start..self.position].iter().collect();
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Identifier);
        self.make(kind, text, line, col)
    }

    fn read_number(&mut self, line: u32, col: u32) -> Token {
        let start = self.position;
        while let Some(c) = self.ch {
            if c.is_ascii_digit() || c == '.' {
                self.read_char();
            } else {
                break;
            }
        }
        // scientific notation
        if matches!(self.ch, Some('e') | Some('E')) {
            let mark = self.position;
            let mark_read = self.read_position;
            self.read_char();
            if matches!(self.ch, Some('+') | Some('-')) {
                self.read_char();
            }
            if self.ch.is_some_and(|c| c.is_ascii_digit()) {
                while self.ch.is_some_and(|c| c.is_ascii_digit()) {
                    self.read_char();
                }
            } else {
                // not actually an exponent; rewind
                self.position = mark;
                self.read_position = mark_read;
                self.ch = self.input.get(self.position).copied();
            }
        }

        let numeric_text: String = self.input[start..self.position].iter().collect();

        // Maximal-munch check for a trailing duration unit. `ms` must be
        // tried before `m` so `5ms` isn't misread as `5m` followed by `s`.
        if self.ch.is_some_and(|c| c.is_ascii_alphabetic()) {
            let letters_start = self.position;
            while self.ch.is_some_and(|c| c.is_ascii_alphabetic()) {
                self.read_char();
            }
            let unit: String = self.input[letters_start..self.position].iter().collect();
            if DURATION_UNITS.contains(&unit.as_str()) {
                let mut text = numeric_text;
                text.push_str(&unit);
                return self.make(TokenKind::Duration, text, line, col);
            }
            // Not a valid unit suffix (e.g. `5min`): illegal duration literal.
            let mut text = numeric_text;
            text.push_str(&unit);
            return self.make(TokenKind::Illegal, text, line, col);
        }

        self.make(TokenKind::Number, numeric_text, line, col)
    }

    fn read_string(&mut self, quote: char, line: u32, col: u32) -> Token {
        self.read_char(); // consume opening quote
        let start = self.position;
        let raw = quote == '`';
        loop {
            match self.ch {
                None => {
                    let text: String = self.input[start..self.position].iter().collect();
                    return self.make(TokenKind::Illegal, text, line, col);
                }
                Some(c) if c == quote => {
                    let text: String = self.input[start..self.position].iter().collect();
                    self.read_char(); // consume closing quote
                    return self.make(TokenKind::String, text, line, col);
                }
                Some('\\') if !raw => {
                    self.read_char();
                    if self.ch.is_some() {
                        self.read_char();
                    }
                }
                Some(_) => self.read_char(),
            }
        }
    }

    /// Tokenize the entire input, including the trailing `Eof` token.
    pub fn tokenize_all(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input).tokenize_all().into_iter().map(|t| t.kind).collect()
    }

    fn texts(input: &str) -> Vec<String> {
        Lexer::new(input).tokenize_all().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn simple_vector_selector() {
        let ks = kinds(r#"http_requests_total{job="api"}"#);
        assert_eq!(
            ks,
            vec![
                TokenKind::Identifier,
                TokenKind::LeftBrace,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::String,
                TokenKind::RightBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn duration_greedy_ms_before_m() {
        let toks = Lexer::new("5ms 5m").tokenize_all();
        assert_eq!(toks[0].kind, TokenKind::Duration);
        assert_eq!(toks[0].text, "5ms");
        assert_eq!(toks[1].kind, TokenKind::Duration);
        assert_eq!(toks[1].text, "5m");
    }

    #[test]
    fn five_min_is_illegal() {
        let toks = Lexer::new("5min").tokenize_all();
        assert_eq!(toks[0].kind, TokenKind::Illegal);
        assert_eq!(toks[0].text, "5min");
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let ks = kinds("foo # a comment\n  + bar");
        assert_eq!(
            ks,
            vec![TokenKind::Identifier, TokenKind::Add, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn regex_matchers_and_comparisons() {
        let ks = kinds("=~ !~ == != <= < >= >");
        assert_eq!(
            ks,
            vec![
                TokenKind::EqlRegex,
                TokenKind::NeqRegex,
                TokenKind::Eql,
                TokenKind::Neq,
                TokenKind::Lte,
                TokenKind::Lss,
                TokenKind::Gte,
                TokenKind::Gtr,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn truncated_bang_is_illegal() {
        let toks = Lexer::new("! foo").tokenize_all();
        assert_eq!(toks[0].kind, TokenKind::Illegal);
        assert_eq!(toks[0].text, "!");
    }

    #[test]
    fn keywords_recognized() {
        let ks = kinds("sum by (job) (rate(x[5m]))");
        assert!(ks.contains(&TokenKind::Sum));
        assert!(ks.contains(&TokenKind::By));
    }

    #[test]
    fn unterminated_string_is_illegal() {
        let toks = Lexer::new("\"abc").tokenize_all();
        assert_eq!(toks[0].kind, TokenKind::Illegal);
    }

    #[test]
    fn raw_backtick_strings_skip_escapes() {
        let t = texts("`a\\b`");
        assert_eq!(t[0], "a\\b");
    }

    #[test]
    fn line_and_column_tracking() {
        let toks = Lexer::new("foo\nbar").tokenize_all();
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[1].line, 2);
    }
}
