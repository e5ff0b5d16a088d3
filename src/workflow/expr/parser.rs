//! Lexer and recursive-descent parser for the expression grammar

use serde_json::{Number, Value};

use super::{Assignment, BinaryOp, Expr, ExprError, UnaryOp};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Separator,
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
    /// Newlines only separate statements outside of brackets
    newline_separates: bool,
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, newline_separates: bool) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            source,
            newline_separates,
            depth: 0,
        }
    }

    fn error(offset: usize, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            offset,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, ExprError> {
        let mut tokens = Vec::new();

        while let Some(&(offset, c)) = self.chars.peek() {
            if c == '\n' && self.newline_separates && self.depth == 0 {
                self.chars.next();
                tokens.push((offset, Token::Separator));
                continue;
            }
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            if c == '#' {
                // comment until end of line
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
                continue;
            }

            let token = if c.is_ascii_digit() {
                self.number(offset)?
            } else if c == '"' || c == '\'' {
                self.string(offset, c)?
            } else if c.is_alphabetic() || c == '_' {
                self.word(offset)
            } else {
                self.symbol(offset, c)?
            };
            tokens.push((offset, token));
        }

        tokens.push((self.source.len(), Token::Eof));
        Ok(tokens)
    }

    fn number(&mut self, start: usize) -> Result<Token, ExprError> {
        let mut end = start;
        let mut is_float = false;
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                end = offset + 1;
                self.chars.next();
            } else if c == '.' && !is_float {
                // `1.foo` is not a number continuation
                let next_is_digit = self.source[offset + 1..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_digit());
                if !next_is_digit {
                    break;
                }
                is_float = true;
                end = offset + 1;
                self.chars.next();
            } else {
                break;
            }
        }

        let text: String = self.source[start..end].chars().filter(|c| *c != '_').collect();
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| Self::error(start, format!("invalid number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| Self::error(start, format!("integer out of range '{}'", text)))
        }
    }

    fn string(&mut self, start: usize, quote: char) -> Result<Token, ExprError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => return Err(Self::error(start, "unterminated string")),
                Some((_, c)) if c == quote => return Ok(Token::Str(value)),
                Some((offset, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, c @ ('\\' | '"' | '\''))) => value.push(c),
                    _ => return Err(Self::error(offset, "invalid escape sequence")),
                },
                Some((_, c)) => value.push(c),
            }
        }
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = offset + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }

        match &self.source[start..end] {
            "true" | "True" => Token::True,
            "false" | "False" => Token::False,
            "null" | "None" => Token::Null,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::In,
            word => Token::Ident(word.to_string()),
        }
    }

    fn symbol(&mut self, offset: usize, c: char) -> Result<Token, ExprError> {
        self.chars.next();
        let next = self.chars.peek().map(|&(_, n)| n);
        let mut take = |token: Token| -> Result<Token, ExprError> {
            self.chars.next();
            Ok(token)
        };

        match (c, next) {
            ('=', Some('=')) => take(Token::EqEq),
            ('!', Some('=')) => take(Token::NotEq),
            ('<', Some('=')) => take(Token::Le),
            ('>', Some('=')) => take(Token::Ge),
            ('&', Some('&')) => take(Token::And),
            ('|', Some('|')) => take(Token::Or),
            _ => {
                let token = match c {
                    '=' => Token::Assign,
                    '!' => Token::Not,
                    '<' => Token::Lt,
                    '>' => Token::Gt,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    ',' => Token::Comma,
                    ':' => Token::Colon,
                    '.' => Token::Dot,
                    ';' => Token::Separator,
                    '(' | '[' | '{' => {
                        self.depth += 1;
                        match c {
                            '(' => Token::LParen,
                            '[' => Token::LBracket,
                            _ => Token::LBrace,
                        }
                    }
                    ')' | ']' | '}' => {
                        self.depth = self.depth.saturating_sub(1);
                        match c {
                            ')' => Token::RParen,
                            ']' => Token::RBracket,
                            _ => Token::RBrace,
                        }
                    }
                    other => {
                        return Err(Self::error(
                            offset,
                            format!("unexpected character '{}'", other),
                        ))
                    }
                };
                Ok(token)
            }
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = self.or();
        self.depth -= 1;
        expr
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not()?;
        while self.eat(&Token::And) {
            let right = self.not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let operand = self.not();
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.sum()?;
        let op = match self.peek() {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::In => BinaryOp::In,
            Token::Not => {
                // `not in`
                if self.tokens.get(self.pos + 1).map(|(_, t)| t) == Some(&Token::In) {
                    self.advance();
                    BinaryOp::NotIn
                } else {
                    return Ok(left);
                }
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.sum()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.product()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn product(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.unary();
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                        Token::Int(i) => expr = Expr::Index(
                            Box::new(expr),
                            Box::new(Expr::Literal(Value::from(i))),
                        ),
                        other => {
                            return Err(self.error(format!(
                                "expected field name after '.', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::LParen => {
                    let name = match &expr {
                        Expr::Var(name) => name.clone(),
                        _ => return Err(self.error("only named functions can be called")),
                    };
                    self.advance();
                    let args = self.items(Token::RParen, "')'")?;
                    expr = Expr::Call(name, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn items(&mut self, close: Token, what: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(&Token::Comma) {
                if self.eat(&close) {
                    return Ok(items);
                }
                continue;
            }
            self.expect(close, what)?;
            return Ok(items);
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Token::Float(f) => Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| self.error("non-finite number")),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Var(name)),
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => Ok(Expr::List(self.items(Token::RBracket, "']'")?)),
            Token::LBrace => self.map(),
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }

    fn map(&mut self) -> Result<Expr, ExprError> {
        let mut pairs = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Map(pairs));
        }
        loop {
            let key = match self.advance() {
                Token::Str(s) | Token::Ident(s) => s,
                other => return Err(self.error(format!("expected map key, found {:?}", other))),
            };
            self.expect(Token::Colon, "':'")?;
            pairs.push((key, self.expression()?));
            if self.eat(&Token::Comma) {
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::Map(pairs));
                }
                continue;
            }
            self.expect(Token::RBrace, "'}'")?;
            return Ok(Expr::Map(pairs));
        }
    }
}

/// Compile a single expression
pub fn parse_expression(source: &str) -> Result<Expr, ExprError> {
    let tokens = Lexer::new(source, false).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expression()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.error(format!("unexpected trailing {:?}", parser.peek())));
    }
    Ok(expr)
}

/// Compile a sequence of `name = expr` statements
pub fn parse_program(source: &str) -> Result<Vec<Assignment>, ExprError> {
    let tokens = Lexer::new(source, true).tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();

    loop {
        while parser.eat(&Token::Separator) {}
        if parser.peek() == &Token::Eof {
            break;
        }

        let target = match parser.advance() {
            Token::Ident(name) => name,
            other => {
                return Err(parser.error(format!(
                    "expected assignment target, found {:?}",
                    other
                )))
            }
        };
        parser.expect(Token::Assign, "'='")?;
        let value = parser.expression()?;
        statements.push(Assignment { target, value });

        match parser.peek() {
            Token::Separator | Token::Eof => {}
            other => {
                return Err(parser.error(format!("expected end of statement, found {:?}", other)))
            }
        }
    }

    Ok(statements)
}
