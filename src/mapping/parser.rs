// Mapping parser
// Turns mapping text such as:
//   root = this
//   fans = fans.map_each(match { this.obsession > 0.5 => this, _ => deleted() })
// into a list of statements. Newlines and ';' separate statements unless they
// appear inside brackets.

use super::ast::{BinaryOp, Expr, Function, MatchArm, Method, Statement, Target, UnaryOp};
use super::error::CompileError;
use serde_json::Value;
use tracing::trace;

const KEYWORDS: &[&str] = &["this", "if", "else", "match", "true", "false", "null"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(Value),
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,
    Assign,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    FatArrow,
    Separator,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("'{name}'"),
            Token::Str(value) => format!("string \"{value}\""),
            Token::Number(value) => format!("number {value}"),
            Token::Separator => "end of statement".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

/// Parse mapping text into statements.
pub fn parse(source: &str) -> Result<Vec<Statement>, CompileError> {
    let tokens = tokenize(source)?;
    trace!("Tokenized mapping into {} tokens", tokens.len());

    let mut parser = Parser {
        tokens,
        pos: 0,
        end: end_location(source),
    };
    let statements = parser.parse_program()?;
    trace!("Parsed mapping into {} statements", statements.len());
    Ok(statements)
}

fn end_location(source: &str) -> (usize, usize) {
    let line = source.lines().count().max(1);
    let column = source.lines().last().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;
    let mut column = 1;
    // Separators only count outside brackets
    let mut depth: usize = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let (start_line, start_column) = (line, column);

        if c == '\n' {
            if depth == 0 {
                tokens.push(Spanned {
                    token: Token::Separator,
                    line,
                    column,
                });
            }
            pos += 1;
            line += 1;
            column = 1;
            continue;
        }

        if c.is_whitespace() {
            pos += 1;
            column += 1;
            continue;
        }

        // Comments run to the end of the line
        if c == '#' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
                column += 1;
            }
            continue;
        }

        if c == ';' {
            if depth > 0 {
                return Err(CompileError::new(
                    line,
                    column,
                    "';' is not allowed inside brackets",
                ));
            }
            tokens.push(Spanned {
                token: Token::Separator,
                line,
                column,
            });
            pos += 1;
            column += 1;
            continue;
        }

        // Quoted strings
        if c == '"' || c == '\'' {
            let quote = c;
            pos += 1;
            column += 1;
            let mut value = String::new();
            loop {
                let Some(&ch) = chars.get(pos) else {
                    return Err(CompileError::new(
                        start_line,
                        start_column,
                        "unterminated string",
                    ));
                };
                if ch == '\n' {
                    return Err(CompileError::new(
                        start_line,
                        start_column,
                        "unterminated string",
                    ));
                }
                pos += 1;
                column += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&escaped) = chars.get(pos) else {
                        return Err(CompileError::new(
                            start_line,
                            start_column,
                            "unterminated string",
                        ));
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        other => {
                            return Err(CompileError::new(
                                line,
                                column,
                                format!("unknown escape sequence '\\{other}'"),
                            ));
                        }
                    });
                    pos += 1;
                    column += 1;
                    continue;
                }
                value.push(ch);
            }
            tokens.push(Spanned {
                token: Token::Str(value),
                line: start_line,
                column: start_column,
            });
            continue;
        }

        // Numbers (sign is handled as a unary operator)
        if c.is_ascii_digit() {
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            let mut is_float = false;
            if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
                is_float = true;
                pos += 1;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            let text: String = chars[start..pos].iter().collect();
            column += pos - start;

            let value = if is_float {
                text.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            } else {
                text.parse::<i64>().ok().map(Value::from)
            };
            let value = value.ok_or_else(|| {
                CompileError::new(
                    start_line,
                    start_column,
                    format!("invalid number literal '{text}'"),
                )
            })?;
            tokens.push(Spanned {
                token: Token::Number(value),
                line: start_line,
                column: start_column,
            });
            continue;
        }

        // Identifiers and keywords
        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            column += pos - start;
            tokens.push(Spanned {
                token: Token::Ident(chars[start..pos].iter().collect()),
                line: start_line,
                column: start_column,
            });
            continue;
        }

        let next = chars.get(pos + 1).copied();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Equal, 2),
            ('=', Some('>')) => (Token::FatArrow, 2),
            ('!', Some('=')) => (Token::NotEqual, 2),
            ('>', Some('=')) => (Token::GreaterEqual, 2),
            ('<', Some('=')) => (Token::LessEqual, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Bang, 1),
            ('>', _) => (Token::Greater, 1),
            ('<', _) => (Token::Less, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            ('(', _) => {
                depth += 1;
                (Token::LeftParen, 1)
            }
            ('{', _) => {
                depth += 1;
                (Token::LeftBrace, 1)
            }
            ('[', _) => {
                depth += 1;
                (Token::LeftBracket, 1)
            }
            (')', _) => {
                depth = depth.saturating_sub(1);
                (Token::RightParen, 1)
            }
            ('}', _) => {
                depth = depth.saturating_sub(1);
                (Token::RightBrace, 1)
            }
            (']', _) => {
                depth = depth.saturating_sub(1);
                (Token::RightBracket, 1)
            }
            (other, _) => {
                return Err(CompileError::new(
                    line,
                    column,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        tokens.push(Spanned {
            token,
            line: start_line,
            column: start_column,
        });
        pos += width;
        column += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: (usize, usize),
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn location(&self) -> (usize, usize) {
        self.tokens
            .get(self.pos)
            .map_or(self.end, |s| (s.line, s.column))
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        let (line, column) = self.location();
        CompileError::new(line, column, message)
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        match self.peek() {
            Some(token) => self.error(format!("expected {expected}, found {}", token.describe())),
            None => self.error(format!("expected {expected}, found end of mapping")),
        }
    }

    fn expect(&mut self, expected: Token, description: &str) -> Result<(), CompileError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(description))
        }
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident == name)
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Separator)) {
            self.pos += 1;
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Statement>, CompileError> {
        let mut statements = Vec::new();
        self.skip_separators();

        while self.peek().is_some() {
            statements.push(self.parse_statement()?);
            match self.peek() {
                None => break,
                Some(Token::Separator) => self.skip_separators(),
                Some(_) => return Err(self.unexpected("end of statement")),
            }
        }

        if statements.is_empty() {
            return Err(CompileError::new(1, 1, "mapping is empty"));
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, CompileError> {
        let (line, _) = self.location();
        let target = self.parse_target()?;
        self.expect(Token::Assign, "'='")?;
        let value = self.parse_expr()?;
        Ok(Statement {
            target,
            value,
            line,
        })
    }

    fn parse_target(&mut self) -> Result<Target, CompileError> {
        let Some(Token::Ident(name)) = self.peek().cloned() else {
            return Err(self.unexpected("assignment target"));
        };

        // `meta key = ...`, while `meta = ...` and `meta.x = ...` are plain fields
        let is_meta = name == "meta"
            && matches!(self.peek_at(1), Some(Token::Ident(_)) | Some(Token::Str(_)));
        if is_meta {
            self.pos += 1;
            return match self.advance() {
                Some(Token::Ident(key)) | Some(Token::Str(key)) => Ok(Target::Metadata(key)),
                _ => Err(self.unexpected("metadata key")),
            };
        }

        if KEYWORDS.contains(&name.as_str()) {
            return Err(self.error(format!("cannot assign to '{name}'")));
        }
        self.pos += 1;

        let mut path = Vec::new();
        if name != "root" {
            path.push(name);
        }
        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            path.push(self.parse_path_segment()?);
        }
        Ok(Target::Document(path))
    }

    fn parse_path_segment(&mut self) -> Result<String, CompileError> {
        match self.peek().cloned() {
            Some(Token::Ident(segment)) | Some(Token::Str(segment)) => {
                self.pos += 1;
                Ok(segment)
            }
            // Array indexes, as in this.items.0
            Some(Token::Number(Value::Number(n))) if n.is_u64() => {
                self.pos += 1;
                Ok(n.to_string())
            }
            _ => Err(self.unexpected("field name")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Equal) => BinaryOp::Equal,
                Some(Token::NotEqual) => BinaryOp::NotEqual,
                Some(Token::Greater) => BinaryOp::GreaterThan,
                Some(Token::GreaterEqual) => BinaryOp::GreaterThanOrEqual,
                Some(Token::Less) => BinaryOp::LessThan,
                Some(Token::LessEqual) => BinaryOp::LessThanOrEqual,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;

        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            let is_ident = matches!(self.peek(), Some(Token::Ident(_)));
            let segment = self.parse_path_segment()?;

            if is_ident && matches!(self.peek(), Some(Token::LeftParen)) {
                let method = self.parse_method(&segment)?;
                expr = Expr::Method {
                    target: Box::new(expr),
                    method,
                };
                continue;
            }

            expr = match expr {
                Expr::This(mut path) => {
                    path.push(segment);
                    Expr::This(path)
                }
                other => Expr::Get {
                    target: Box::new(other),
                    field: segment,
                },
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };

        match token {
            Token::Number(value) => {
                self.pos += 1;
                Ok(Expr::Literal(value))
            }
            Token::Str(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(value)))
            }
            Token::LeftParen => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(Token::RightParen, "')'")?;
                Ok(expr)
            }
            Token::LeftBrace => self.parse_object(),
            Token::LeftBracket => self.parse_array(),
            Token::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(name == "true")))
                }
                "null" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Null))
                }
                "this" => {
                    self.pos += 1;
                    Ok(Expr::This(Vec::new()))
                }
                "if" => {
                    self.pos += 1;
                    self.parse_if()
                }
                "match" => {
                    self.pos += 1;
                    self.parse_match()
                }
                "root" => Err(self.error("'root' cannot be read, use 'this'")),
                "else" => Err(self.unexpected("expression")),
                _ if matches!(self.peek_at(1), Some(Token::LeftParen)) => {
                    self.pos += 1;
                    self.parse_function(&name)
                }
                _ => {
                    // A bare field name is shorthand for this.<field>
                    self.pos += 1;
                    Ok(Expr::This(vec![name]))
                }
            },
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_if(&mut self) -> Result<Expr, CompileError> {
        let condition = self.parse_expr()?;
        self.expect(Token::LeftBrace, "'{' after if condition")?;
        let then_branch = self.parse_expr()?;
        self.expect(Token::RightBrace, "'}'")?;

        let else_branch = if self.is_ident("else") {
            self.pos += 1;
            if self.is_ident("if") {
                self.pos += 1;
                Some(Box::new(self.parse_if()?))
            } else {
                self.expect(Token::LeftBrace, "'{' after else")?;
                let branch = self.parse_expr()?;
                self.expect(Token::RightBrace, "'}'")?;
                Some(Box::new(branch))
            }
        } else {
            None
        };

        Ok(Expr::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn parse_match(&mut self) -> Result<Expr, CompileError> {
        self.expect(Token::LeftBrace, "'{' after match")?;
        let mut arms = Vec::new();

        loop {
            if matches!(self.peek(), Some(Token::RightBrace)) {
                self.pos += 1;
                break;
            }

            let is_wildcard =
                self.is_ident("_") && matches!(self.peek_at(1), Some(Token::FatArrow));
            let condition = if is_wildcard {
                self.pos += 1;
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(Token::FatArrow, "'=>'")?;
            let value = self.parse_expr()?;
            arms.push(MatchArm { condition, value });

            if matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
            }
        }

        if arms.is_empty() {
            return Err(self.error("match requires at least one arm"));
        }
        Ok(Expr::Match(arms))
    }

    fn parse_object(&mut self) -> Result<Expr, CompileError> {
        self.expect(Token::LeftBrace, "'{'")?;
        let mut entries = Vec::new();

        while !matches!(self.peek(), Some(Token::RightBrace)) {
            let key = match self.peek().cloned() {
                Some(Token::Str(key)) | Some(Token::Ident(key)) => key,
                _ => return Err(self.unexpected("object key")),
            };
            self.pos += 1;
            self.expect(Token::Colon, "':'")?;
            entries.push((key, self.parse_expr()?));

            if matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
            } else {
                break;
            }
        }

        self.expect(Token::RightBrace, "'}'")?;
        Ok(Expr::Object(entries))
    }

    fn parse_array(&mut self) -> Result<Expr, CompileError> {
        self.expect(Token::LeftBracket, "'['")?;
        let mut items = Vec::new();

        while !matches!(self.peek(), Some(Token::RightBracket)) {
            items.push(self.parse_expr()?);
            if matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
            } else {
                break;
            }
        }

        self.expect(Token::RightBracket, "']'")?;
        Ok(Expr::Array(items))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(Token::LeftParen, "'('")?;
        let mut args = Vec::new();

        while !matches!(self.peek(), Some(Token::RightParen)) {
            args.push(self.parse_expr()?);
            if matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
            } else {
                break;
            }
        }

        self.expect(Token::RightParen, "')'")?;
        Ok(args)
    }

    fn parse_function(&mut self, name: &str) -> Result<Expr, CompileError> {
        let (line, column) = self.location();
        let args = self.parse_arguments()?;
        let arity_error = |expected: usize| {
            CompileError::new(
                line,
                column,
                format!(
                    "function {name}() expects {expected} argument(s), got {}",
                    args.len()
                ),
            )
        };

        let function = match name {
            "deleted" | "batch_index" | "batch_size" | "content" => {
                if !args.is_empty() {
                    return Err(arity_error(0));
                }
                match name {
                    "deleted" => Function::Deleted,
                    "batch_index" => Function::BatchIndex,
                    "batch_size" => Function::BatchSize,
                    _ => Function::Content,
                }
            }
            "meta" => match args.as_slice() {
                [Expr::Literal(Value::String(key))] => Function::Meta(key.clone()),
                [_] => {
                    return Err(CompileError::new(
                        line,
                        column,
                        "function meta() expects a string literal key",
                    ));
                }
                _ => return Err(arity_error(1)),
            },
            other => {
                return Err(CompileError::new(
                    line,
                    column,
                    format!("unknown function '{other}'"),
                ));
            }
        };

        Ok(Expr::Function(function))
    }

    fn parse_method(&mut self, name: &str) -> Result<Method, CompileError> {
        let (line, column) = self.location();
        let mut args = self.parse_arguments()?;

        let expected = if name == "map_each" { 1 } else { 0 };
        if args.len() != expected {
            return Err(CompileError::new(
                line,
                column,
                format!(
                    "method {name}() expects {expected} argument(s), got {}",
                    args.len()
                ),
            ));
        }

        let method = match name {
            "uppercase" => Method::Uppercase,
            "lowercase" => Method::Lowercase,
            "trim" => Method::Trim,
            "length" => Method::Length,
            "number" => Method::Number,
            "string" => Method::String,
            "not_null" => Method::NotNull,
            "map_each" => match args.pop() {
                Some(expr) => Method::MapEach(Box::new(expr)),
                None => {
                    return Err(CompileError::new(
                        line,
                        column,
                        "map_each() requires an argument",
                    ));
                }
            },
            other => {
                return Err(CompileError::new(
                    line,
                    column,
                    format!("unknown method '{other}'"),
                ));
            }
        };

        Ok(method)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
