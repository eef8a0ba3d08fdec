//! Tokenizer for strategy scripts.
//!
//! Produces a flat token stream with `Newline`, `Indent` and `Dedent` markers
//! so the parser can treat indentation-delimited blocks like braces.
//! Newlines inside brackets and after a trailing backslash are joined.

use super::ParseError;

/// Token types for lexing.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Name(String),
    Number(f64),
    Str(String),
    // Keywords
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Elif,
    Else,
    For,
    While,
    Pass,
    Break,
    Continue,
    Import,
    From,
    As,
    True,
    False,
    None,
    /// Keyword the sandbox recognizes but never executes (`def`, `lambda`, ...)
    Reserved(&'static str),
    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    // Layout
    Newline,
    Indent,
    Dedent,
    // End
    Eof,
}

const RESERVED: &[&str] = &[
    "def", "class", "lambda", "with", "try", "except", "finally", "return", "async", "await",
    "global", "nonlocal", "del", "raise", "assert", "yield",
];

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    line_start: usize,
    depth: usize,
    indents: Vec<usize>,
    out: Vec<Lexeme>,
}

/// Tokenize a strategy script.
pub fn tokenize(input: &str) -> Result<Vec<Lexeme>, ParseError> {
    let mut lexer = Lexer {
        chars: input.chars().collect(),
        pos: 0,
        line: 1,
        line_start: 0,
        depth: 0,
        indents: vec![0],
        out: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.out)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn column(&self) -> usize {
        self.pos - self.line_start + 1
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, self.column(), message)
    }

    fn push(&mut self, token: Token, column: usize) {
        self.out.push(Lexeme {
            token,
            line: self.line,
            column,
        });
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.line_start = self.pos;
    }

    fn last_is_layout(&self) -> bool {
        matches!(
            self.out.last().map(|l| &l.token),
            None | Some(Token::Newline) | Some(Token::Indent) | Some(Token::Dedent)
        )
    }

    fn run(&mut self) -> Result<(), ParseError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    at_line_start = true;
                    continue;
                }
            }

            let c = self.chars[self.pos];

            if c == '\n' {
                if self.depth == 0 && !self.last_is_layout() {
                    let col = self.column();
                    self.push(Token::Newline, col);
                }
                self.newline();
                at_line_start = self.depth == 0;
                continue;
            }

            if c == ' ' || c == '\t' || c == '\r' || c == '\x0c' {
                self.pos += 1;
                continue;
            }

            if c == '#' {
                while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                    self.pos += 1;
                }
                continue;
            }

            if c == '\\' {
                let mut look = self.pos + 1;
                while look < self.chars.len() && self.chars[look] == '\r' {
                    look += 1;
                }
                if look < self.chars.len() && self.chars[look] == '\n' {
                    self.pos = look;
                    self.newline();
                    continue;
                }
                return Err(self.error("unexpected character after line continuation"));
            }

            let column = self.column();

            if c == '"' || c == '\'' {
                let s = self.string_literal(c)?;
                self.push(Token::Str(s), column);
                continue;
            }

            if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit())) {
                let n = self.number()?;
                self.push(Token::Number(n), column);
                continue;
            }

            if c.is_alphabetic() || c == '_' {
                let start = self.pos;
                while self.pos < self.chars.len()
                    && (self.chars[self.pos].is_alphanumeric() || self.chars[self.pos] == '_')
                {
                    self.pos += 1;
                }
                let ident: String = self.chars[start..self.pos].iter().collect();

                // String prefixes: r"..", f'..', b"..", rb'..'
                if let Some(q @ ('"' | '\'')) = self.peek(0) {
                    let lower = ident.to_ascii_lowercase();
                    if matches!(lower.as_str(), "r" | "f" | "b" | "u" | "rb" | "br" | "fr" | "rf") {
                        let s = self.string_literal(q)?;
                        self.push(Token::Str(s), column);
                        continue;
                    }
                }

                let token = keyword(&ident).unwrap_or(Token::Name(ident));
                self.push(token, column);
                continue;
            }

            if let Some(token) = self.operator()? {
                match token {
                    Token::LParen | Token::LBracket | Token::LBrace => self.depth += 1,
                    Token::RParen | Token::RBracket | Token::RBrace => {
                        self.depth = self
                            .depth
                            .checked_sub(1)
                            .ok_or_else(|| self.error("unmatched closing bracket"))?;
                    }
                    _ => {}
                }
                self.push(token, column);
                continue;
            }

            return Err(self.error(format!("unexpected character '{c}'")));
        }

        if self.depth > 0 {
            return Err(self.error("unexpected end of input inside brackets"));
        }

        if !self.last_is_layout() {
            let col = self.column();
            self.push(Token::Newline, col);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent, 1);
        }
        let col = self.column();
        self.push(Token::Eof, col);
        Ok(())
    }

    /// Measure leading whitespace and emit Indent/Dedent.
    ///
    /// Returns true when the line is blank or comment-only and was skipped.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek(0) {
            None => return Ok(true),
            Some('\n') => {
                self.newline();
                return Ok(true);
            }
            Some('#') => {
                while self.peek(0).is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                if self.peek(0).is_some() {
                    self.newline();
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Token::Indent, 1);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Token::Dedent, 1);
            }
            if self.indents.last() != Some(&width) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn string_literal(&mut self, quote: char) -> Result<String, ParseError> {
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let (start_line, start_col) = (self.line, self.column());
        self.pos += if triple { 3 } else { 1 };

        let mut s = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ParseError::new(start_line, start_col, "unterminated string literal"));
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(s);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(s);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(ParseError::new(start_line, start_col, "unterminated string literal"));
                }
                s.push(c);
                self.newline();
                continue;
            }

            if c == '\\' {
                if let Some(next) = self.peek(1) {
                    let escaped = match next {
                        'n' => Some('\n'),
                        't' => Some('\t'),
                        '\\' => Some('\\'),
                        '\'' => Some('\''),
                        '"' => Some('"'),
                        _ => None,
                    };
                    if let Some(e) = escaped {
                        s.push(e);
                        self.pos += 2;
                        continue;
                    }
                    if next == '\n' {
                        self.pos += 1;
                        self.newline();
                        continue;
                    }
                }
            }

            s.push(c);
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<f64, ParseError> {
        let start = self.pos;
        let column = self.column();

        while self
            .peek(0)
            .is_some_and(|c| c.is_ascii_digit() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let sign = matches!(self.peek(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let raw: String = self.chars[start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();
        raw.parse()
            .map_err(|_| ParseError::new(self.line, column, format!("invalid number literal '{raw}'")))
    }

    fn operator(&mut self) -> Result<Option<Token>, ParseError> {
        let c = self.chars[self.pos];
        let next = self.peek(1);

        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('+', Some('=')) => (Token::PlusAssign, 2),
            ('-', Some('=')) => (Token::MinusAssign, 2),
            ('*', Some('=')) => (Token::StarAssign, 2),
            ('/', Some('=')) => (Token::SlashAssign, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('&', _) => (Token::Amp, 1),
            ('|', _) => (Token::Pipe, 1),
            ('^', _) => (Token::Caret, 1),
            ('~', _) => (Token::Tilde, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('=', _) => (Token::Assign, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            ('.', _) => (Token::Dot, 1),
            _ => return Ok(None),
        };

        // `**=` and `//=` are not part of the language
        if width == 2 && matches!(token, Token::DoubleStar | Token::DoubleSlash) && self.peek(2) == Some('=') {
            return Err(self.error("augmented assignment operator not supported"));
        }

        self.pos += width;
        Ok(Some(token))
    }
}

fn keyword(ident: &str) -> Option<Token> {
    let token = match ident {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        "is" => Token::Is,
        "if" => Token::If,
        "elif" => Token::Elif,
        "else" => Token::Else,
        "for" => Token::For,
        "while" => Token::While,
        "pass" => Token::Pass,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "import" => Token::Import,
        "from" => Token::From,
        "as" => Token::As,
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        other => return RESERVED.iter().find(|&&kw| kw == other).map(|&kw| Token::Reserved(kw)),
    };
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn test_tokenize_assignment() {
        assert_eq!(
            kinds("x = 1.5\n"),
            vec![
                Token::Name("x".into()),
                Token::Assign,
                Token::Number(1.5),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("if a:\n    b = 1\nc = 2\n");
        assert!(tokens.contains(&Token::Indent));
        let indent = tokens.iter().position(|t| *t == Token::Indent).unwrap();
        let dedent = tokens.iter().position(|t| *t == Token::Dedent).unwrap();
        assert!(indent < dedent);
        assert_eq!(tokens[dedent + 1], Token::Name("c".into()));
    }

    #[test]
    fn test_brackets_join_lines_and_comments_vanish() {
        let tokens = kinds("x = f(1,\n      2)  # trailing\n# only comment\n\ny = 3");
        let newlines = tokens.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 2);
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a ** -b // c != d"),
            vec![
                Token::Name("a".into()),
                Token::DoubleStar,
                Token::Minus,
                Token::Name("b".into()),
                Token::DoubleSlash,
                Token::Name("c".into()),
                Token::Ne,
                Token::Name("d".into()),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_strings_and_prefixes() {
        let tokens = kinds("a = 'x'\nb = f\"y\"\nc = \"\"\"doc\nstring\"\"\"\n");
        assert!(tokens.contains(&Token::Str("x".into())));
        assert!(tokens.contains(&Token::Str("y".into())));
        assert!(tokens.contains(&Token::Str("doc\nstring".into())));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1e-3")[0], Token::Number(0.001));
        assert_eq!(kinds("1_000")[0], Token::Number(1000.0));
        assert_eq!(kinds(".5")[0], Token::Number(0.5));
    }

    #[test]
    fn test_reserved_keywords() {
        assert_eq!(kinds("lambda")[0], Token::Reserved("lambda"));
        assert_eq!(kinds("def")[0], Token::Reserved("def"));
    }

    #[test]
    fn test_errors_carry_position() {
        let err = tokenize("x = 1\ny = $").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 5);

        let err = tokenize("if a:\n    b\n  c\n").unwrap_err();
        assert!(err.message.contains("unindent"));

        assert!(tokenize("x = (1, 2").is_err());
        assert!(tokenize("s = 'open").is_err());
    }
}
