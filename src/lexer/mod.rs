use logos::Logos;

/// Lexer state threaded through logos callbacks. Lines are 1-based.
#[derive(Debug, Clone, Copy)]
pub struct LexExtras {
    pub line: u32,
}

impl Default for LexExtras {
    fn default() -> Self {
        LexExtras { line: 1 }
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(extras = LexExtras)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[regex(r"\n", |lex| {
        lex.extras.line += 1;
        logos::Skip
    })]
    Newline,

    // Single-character punctuation
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,

    // One- or two-character operators
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,

    // Literals
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,
    // Strings are non-escaping and may span lines; bump the line counter past
    // any newlines they swallow so following tokens report correctly.
    #[regex(r#""[^"]*""#, |lex| {
        let newlines = lex.slice().bytes().filter(|&b| b == b'\n').count() as u32;
        lex.extras.line += newlines;
    })]
    String,
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // Reserved words
    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("fun")]
    Fun,
    #[token("if")]
    If,
    #[token("nil")]
    Nil,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,
}

/// Token kinds seen by the compiler: the lexed kinds plus the two synthetic
/// ones (`Error` for lexical failures, `Eof` at end of input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Identifier,
    String,
    Number,
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,
    Error,
    Eof,
}

impl From<RawToken> for TokenKind {
    fn from(raw: RawToken) -> TokenKind {
        match raw {
            RawToken::Newline => TokenKind::Error, // skipped by logos; never surfaces
            RawToken::LeftParen => TokenKind::LeftParen,
            RawToken::RightParen => TokenKind::RightParen,
            RawToken::LeftBrace => TokenKind::LeftBrace,
            RawToken::RightBrace => TokenKind::RightBrace,
            RawToken::Comma => TokenKind::Comma,
            RawToken::Dot => TokenKind::Dot,
            RawToken::Minus => TokenKind::Minus,
            RawToken::Plus => TokenKind::Plus,
            RawToken::Semicolon => TokenKind::Semicolon,
            RawToken::Slash => TokenKind::Slash,
            RawToken::Star => TokenKind::Star,
            RawToken::Bang => TokenKind::Bang,
            RawToken::BangEqual => TokenKind::BangEqual,
            RawToken::Equal => TokenKind::Equal,
            RawToken::EqualEqual => TokenKind::EqualEqual,
            RawToken::Greater => TokenKind::Greater,
            RawToken::GreaterEqual => TokenKind::GreaterEqual,
            RawToken::Less => TokenKind::Less,
            RawToken::LessEqual => TokenKind::LessEqual,
            RawToken::Identifier => TokenKind::Identifier,
            RawToken::String => TokenKind::String,
            RawToken::Number => TokenKind::Number,
            RawToken::And => TokenKind::And,
            RawToken::Class => TokenKind::Class,
            RawToken::Else => TokenKind::Else,
            RawToken::False => TokenKind::False,
            RawToken::For => TokenKind::For,
            RawToken::Fun => TokenKind::Fun,
            RawToken::If => TokenKind::If,
            RawToken::Nil => TokenKind::Nil,
            RawToken::Or => TokenKind::Or,
            RawToken::Print => TokenKind::Print,
            RawToken::Return => TokenKind::Return,
            RawToken::Super => TokenKind::Super,
            RawToken::This => TokenKind::This,
            RawToken::True => TokenKind::True,
            RawToken::Var => TokenKind::Var,
            RawToken::While => TokenKind::While,
        }
    }
}

/// A token handed to the compiler. For `Error` tokens, `lexeme` carries the
/// error message rather than source text.
#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

impl<'src> Token<'src> {
    /// Placeholder used before the first `advance` primes the token window.
    pub fn placeholder() -> Token<'src> {
        Token { kind: TokenKind::Eof, lexeme: "", line: 1 }
    }
}

pub struct Scanner<'src> {
    lexer: logos::Lexer<'src, RawToken>,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner { lexer: RawToken::lexer(source) }
    }

    pub fn next_token(&mut self) -> Token<'src> {
        match self.lexer.next() {
            None => Token { kind: TokenKind::Eof, lexeme: "", line: self.lexer.extras.line },
            Some(Ok(raw)) => Token {
                kind: raw.into(),
                lexeme: self.lexer.slice(),
                line: self.lexer.extras.line,
            },
            Some(Err(())) => {
                let message = if self.lexer.slice().starts_with('"') {
                    "Unterminated string."
                } else {
                    "Unexpected character."
                };
                Token { kind: TokenKind::Error, lexeme: message, line: self.lexer.extras.line }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.next_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                return out;
            }
        }
    }

    #[test]
    fn scans_punctuation_and_operators() {
        assert_eq!(
            kinds("(){};,.-+/* ! != = == > >= < <="),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("var x = nil; fun classy"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Nil,
                TokenKind::Semicolon,
                TokenKind::Fun,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_number_lexemes() {
        let mut scanner = Scanner::new("12 3.75");
        let first = scanner.next_token();
        assert_eq!(first.kind, TokenKind::Number);
        assert_eq!(first.lexeme, "12");
        let second = scanner.next_token();
        assert_eq!(second.kind, TokenKind::Number);
        assert_eq!(second.lexeme, "3.75");
    }

    #[test]
    fn tracks_line_numbers() {
        let mut scanner = Scanner::new("one\ntwo\n\nthree");
        assert_eq!(scanner.next_token().line, 1);
        assert_eq!(scanner.next_token().line, 2);
        assert_eq!(scanner.next_token().line, 4);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("a // the rest is ignored\nb"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn string_spanning_lines_reports_closing_line() {
        let mut scanner = Scanner::new("\"one\ntwo\" after");
        let string = scanner.next_token();
        assert_eq!(string.kind, TokenKind::String);
        assert_eq!(string.line, 2);
        let after = scanner.next_token();
        assert_eq!(after.line, 2);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new("\"abc");
        let token = scanner.next_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unterminated string.");
    }

    #[test]
    fn unexpected_character_is_an_error_token() {
        let mut scanner = Scanner::new("@");
        let token = scanner.next_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unexpected character.");
    }
}
