//! Recursive-descent parser for strategy scripts.

use super::ast::{
    BinaryOperator, BoolOperator, CompareOperator, Expr, ImportAlias, Program, Stmt, StmtKind,
    UnaryOperator,
};
use super::lexer::{tokenize, Lexeme, Token};
use super::ParseError;

/// Parse a strategy script into a [`Program`].
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

/// Deepest nesting of expressions and blocks a script may use.
pub const MAX_NESTING: usize = 100;

struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    /// Current syntax-tree depth, bounded by [`MAX_NESTING`]
    depth: usize,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    fn new(tokens: Vec<Lexeme>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Enter one level of nesting. Callers pair it with [`Parser::ascend`].
    fn descend(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("nesting exceeds {MAX_NESTING} levels")));
        }
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.descend()?;
        let out = parse(self);
        self.ascend(1);
        out
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.current() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let lexeme = &self.tokens[self.pos];
        ParseError::new(lexeme.line, lexeme.column, message)
    }

    fn unexpected(&self) -> ParseError {
        self.error(format!("unexpected {}", describe(self.current())))
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<()> {
        if *self.current() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {what}, found {}",
                describe(self.current())
            )))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.current().clone() {
            Token::Name(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(&other)))),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !matches!(self.current(), Token::Eof) {
            if self.eat(&Token::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        match self.current() {
            Token::If => Ok(vec![self.parse_if()?]),
            Token::For => Ok(vec![self.parse_for()?]),
            Token::While => Ok(vec![self.parse_while()?]),
            Token::Reserved(kw) if is_compound_keyword(kw) => {
                let kw = *kw;
                Ok(vec![self.parse_unsupported_compound(kw)?])
            }
            Token::Indent => Err(self.error("unexpected indent")),
            Token::Dedent => Err(self.unexpected()),
            _ => self.parse_simple_line(),
        }
    }

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small()?];
        while self.eat(&Token::Semicolon) {
            if matches!(self.current(), Token::Newline | Token::Eof) {
                break;
            }
            stmts.push(self.parse_small()?);
        }
        match self.current() {
            Token::Newline => {
                self.advance();
                Ok(stmts)
            }
            Token::Eof | Token::Dedent => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_small(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let kind = match self.current() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Token::Import => self.parse_import()?,
            Token::From => self.parse_from_import()?,
            Token::Reserved(kw) if is_simple_keyword(kw) => {
                let kw = *kw;
                self.parse_unsupported_simple(kw)?
            }
            _ => self.parse_expr_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat(&Token::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_alias(&mut self, dotted: bool) -> PResult<ImportAlias> {
        let name = if dotted {
            self.parse_dotted_name()?
        } else {
            self.expect_name()?
        };
        let alias = if self.eat(&Token::As) {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(ImportAlias { name, alias })
    }

    fn parse_import(&mut self) -> PResult<StmtKind> {
        self.advance();
        let mut names = vec![self.parse_alias(true)?];
        while self.eat(&Token::Comma) {
            names.push(self.parse_alias(true)?);
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> PResult<StmtKind> {
        self.advance();
        let mut module = String::new();
        while self.eat(&Token::Dot) {
            module.push('.');
        }
        if matches!(self.current(), Token::Name(_)) {
            module.push_str(&self.parse_dotted_name()?);
        }
        if module.is_empty() {
            return Err(self.error("expected a module name"));
        }
        self.expect(Token::Import, "'import'")?;

        let mut names = Vec::new();
        if self.eat(&Token::Star) {
            names.push(ImportAlias {
                name: "*".into(),
                alias: None,
            });
        } else {
            let parenthesized = self.eat(&Token::LParen);
            names.push(self.parse_alias(false)?);
            while self.eat(&Token::Comma) {
                if parenthesized && matches!(self.current(), Token::RParen) {
                    break;
                }
                names.push(self.parse_alias(false)?);
            }
            if parenthesized {
                self.expect(Token::RParen, "')'")?;
            }
        }
        Ok(StmtKind::FromImport { module, names })
    }

    fn parse_expr_statement(&mut self) -> PResult<StmtKind> {
        let first = self.parse_expr_list()?;

        let aug = match self.current() {
            Token::PlusAssign => Some(BinaryOperator::Add),
            Token::MinusAssign => Some(BinaryOperator::Sub),
            Token::StarAssign => Some(BinaryOperator::Mul),
            Token::SlashAssign => Some(BinaryOperator::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.check_target(&first)?;
            if matches!(first, Expr::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            self.advance();
            let value = self.parse_expr_list()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if !matches!(self.current(), Token::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![first];
        let value = loop {
            self.advance();
            let next = self.parse_expr_list()?;
            if matches!(self.current(), Token::Assign) {
                targets.push(next);
            } else {
                break next;
            }
        };
        for target in &targets {
            self.check_target(target)?;
        }
        Ok(StmtKind::Assign { targets, value })
    }

    fn check_target(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(items) | Expr::List(items) => {
                items.iter().try_for_each(|item| self.check_target(item))
            }
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::parse_suite)
    }

    fn parse_suite(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::Colon, "':'")?;
        if !self.eat(&Token::Newline) {
            // Single-line suite: `if x: y = 1`
            return self.parse_simple_line();
        }
        if !self.eat(&Token::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !matches!(self.current(), Token::Dedent | Token::Eof) {
            body.extend(self.parse_statement()?);
        }
        self.eat(&Token::Dedent);
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // `if` or `elif`
        let test = self.parse_expr()?;
        let body = self.parse_block()?;

        let orelse = match self.current() {
            Token::Elif => vec![self.nested(Self::parse_if)?],
            Token::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };

        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect(Token::In, "'in'")?;
        let iter = self.parse_expr_list()?;
        let body = self.parse_block()?;
        if matches!(self.current(), Token::Else) {
            return Err(self.error("'else' clause on loops is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        if matches!(self.current(), Token::Else) {
            return Err(self.error("'else' clause on loops is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            line,
        })
    }

    /// Skip a compound header up to its top-level `:` without consuming it.
    fn skip_header(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            match self.current() {
                Token::Colon if depth == 0 => return Ok(()),
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    depth = depth.saturating_sub(1);
                }
                Token::Newline | Token::Eof => return Err(self.error("expected ':'")),
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_unsupported_compound(&mut self, keyword: &'static str) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let mut exprs = Vec::new();

        match keyword {
            "with" => loop {
                exprs.push(self.parse_expr()?);
                if self.eat(&Token::As) {
                    exprs.push(self.parse_target()?);
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            },
            _ => self.skip_header()?,
        }

        let mut body = self.parse_block()?;

        if keyword == "try" {
            loop {
                match self.current() {
                    Token::Reserved("except") | Token::Reserved("finally") | Token::Else => {
                        self.advance();
                        self.skip_header()?;
                        body.extend(self.parse_block()?);
                    }
                    _ => break,
                }
            }
        }

        Ok(Stmt {
            kind: StmtKind::Unsupported {
                keyword,
                exprs,
                body,
            },
            line,
        })
    }

    fn parse_unsupported_simple(&mut self, keyword: &'static str) -> PResult<StmtKind> {
        self.advance();
        let mut exprs = Vec::new();
        if !matches!(
            self.current(),
            Token::Newline | Token::Eof | Token::Semicolon | Token::Dedent
        ) {
            exprs.push(self.parse_expr_list()?);
            // `raise X from Y`
            if keyword == "raise" && self.eat(&Token::From) {
                exprs.push(self.parse_expr()?);
            }
        }
        Ok(StmtKind::Unsupported {
            keyword,
            exprs,
            body: Vec::new(),
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Comma-separated expressions; more than one (or a trailing comma) forms a tuple.
    fn parse_expr_list(&mut self) -> PResult<Expr> {
        let first = self.parse_expr()?;
        if !matches!(self.current(), Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if ends_expr_list(self.current()) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Assignment targets for `for` loops and comprehensions.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let first = self.parse_target()?;
        if !matches!(self.current(), Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.current(), Token::In) {
                break;
            }
            items.push(self.parse_target()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_target(&mut self) -> PResult<Expr> {
        let target = self.parse_postfix()?;
        self.check_target(&target)?;
        Ok(target)
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        if matches!(self.current(), Token::Reserved("lambda")) {
            return self.parse_lambda();
        }

        let body = self.parse_or()?;
        if !matches!(self.current(), Token::If) {
            return Ok(body);
        }

        self.advance();
        let test = self.parse_or()?;
        self.expect(Token::Else, "'else' in conditional expression")?;
        let orelse = self.parse_expr()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        self.advance();
        self.skip_header()?;
        self.advance(); // ':'
        let body = self.parse_expr()?;
        Ok(Expr::Unsupported {
            keyword: "lambda",
            inner: vec![body],
        })
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        let mut levels = 0;

        while matches!(self.current(), Token::Or) {
            self.descend()?;
            levels += 1;
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BoolOp {
                op: BoolOperator::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.ascend(levels);
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_not()?;
        let mut levels = 0;

        while matches!(self.current(), Token::And) {
            self.descend()?;
            levels += 1;
            self.advance();
            let right = self.parse_not()?;
            left = Expr::BoolOp {
                op: BoolOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.ascend(levels);
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if matches!(self.current(), Token::Not) {
            self.advance();
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_operator(&mut self) -> Option<CompareOperator> {
        let op = match (self.current(), self.peek(1)) {
            (Token::Eq, _) => CompareOperator::Eq,
            (Token::Ne, _) => CompareOperator::Ne,
            (Token::Lt, _) => CompareOperator::Lt,
            (Token::Le, _) => CompareOperator::Le,
            (Token::Gt, _) => CompareOperator::Gt,
            (Token::Ge, _) => CompareOperator::Ge,
            (Token::In, _) => CompareOperator::In,
            (Token::Not, Token::In) => {
                self.advance();
                CompareOperator::NotIn
            }
            (Token::Is, Token::Not) => {
                self.advance();
                CompareOperator::IsNot
            }
            (Token::Is, _) => CompareOperator::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    /// Chained comparisons `a < b < c` become `a < b and b < c`.
    fn parse_comparison(&mut self) -> PResult<Expr> {
        let first = self.parse_bitor()?;
        let mut pairs: Vec<Expr> = Vec::new();
        let mut left = first.clone();
        let mut levels = 0;

        while let Some(op) = self.comparison_operator() {
            self.descend()?;
            levels += 1;
            let right = self.parse_bitor()?;
            pairs.push(Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right.clone()),
            });
            left = right;
        }
        self.ascend(levels);

        let mut iter = pairs.into_iter();
        let Some(mut expr) = iter.next() else {
            return Ok(first);
        };
        for next in iter {
            expr = Expr::BoolOp {
                op: BoolOperator::And,
                left: Box::new(expr),
                right: Box::new(next),
            };
        }
        Ok(expr)
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        op_for: fn(&Token) -> Option<BinaryOperator>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        let mut levels = 0;

        while let Some(op) = op_for(self.current()) {
            self.descend()?;
            levels += 1;
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        self.ascend(levels);
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitxor, |t| {
            matches!(t, Token::Pipe).then_some(BinaryOperator::BitOr)
        })
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitand, |t| {
            matches!(t, Token::Caret).then_some(BinaryOperator::BitXor)
        })
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_additive, |t| {
            matches!(t, Token::Amp).then_some(BinaryOperator::BitAnd)
        })
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_multiplicative, |t| match t {
            Token::Plus => Some(BinaryOperator::Add),
            Token::Minus => Some(BinaryOperator::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_unary, |t| match t {
            Token::Star => Some(BinaryOperator::Mul),
            Token::Slash => Some(BinaryOperator::Div),
            Token::DoubleSlash => Some(BinaryOperator::FloorDiv),
            Token::Percent => Some(BinaryOperator::Mod),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.current() {
            Token::Minus => UnaryOperator::Neg,
            Token::Plus => UnaryOperator::Pos,
            Token::Tilde => UnaryOperator::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    /// `**` binds tighter than a unary operator on its left, looser on its right.
    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.eat(&Token::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.nested(Self::parse_unary)?;
        Ok(Expr::Binary {
            left: Box::new(base),
            op: BinaryOperator::Pow,
            right: Box::new(exponent),
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        let mut levels = 0;

        loop {
            if matches!(self.current(), Token::Dot | Token::LParen | Token::LBracket) {
                self.descend()?;
                levels += 1;
            }
            match self.current() {
                Token::Dot => {
                    self.advance();
                    let attr = self.expect_name()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }

        self.ascend(levels);
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !matches!(self.current(), Token::RParen) {
            if matches!(self.current(), Token::Star | Token::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }

            if let (Token::Name(name), Token::Assign) = (self.current(), self.peek(1)) {
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.parse_expr()?;
                if matches!(self.current(), Token::For) {
                    // Bare generator argument: `sum(x for x in xs)`
                    args.push(self.parse_comprehension(arg)?);
                } else {
                    args.push(arg);
                }
            }

            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect(Token::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let first = self.parse_slice_item()?;
        if !matches!(self.current(), Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(self.current(), Token::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let lower = if matches!(self.current(), Token::Colon) {
            None
        } else {
            let expr = self.parse_expr()?;
            if !matches!(self.current(), Token::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };

        self.expect(Token::Colon, "':'")?;
        let upper = if matches!(
            self.current(),
            Token::Colon | Token::RBracket | Token::Comma
        ) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        let step = if self.eat(&Token::Colon)
            && !matches!(self.current(), Token::RBracket | Token::Comma)
        {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_comprehension(&mut self, element: Expr) -> PResult<Expr> {
        self.expect(Token::For, "'for'")?;
        let target = self.parse_target_list()?;
        self.expect(Token::In, "'in'")?;
        let iter = self.parse_or()?;
        let mut conditions = Vec::new();
        while self.eat(&Token::If) {
            conditions.push(self.parse_or()?);
        }
        if matches!(self.current(), Token::For) {
            return Err(self.error("nested comprehensions are not supported"));
        }
        Ok(Expr::ListComp {
            element: Box::new(element),
            target: Box::new(target),
            iter: Box::new(iter),
            conditions,
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let expr = match self.current().clone() {
            Token::None => {
                self.advance();
                Expr::None
            }
            Token::True => {
                self.advance();
                Expr::Bool(true)
            }
            Token::False => {
                self.advance();
                Expr::Bool(false)
            }
            Token::Number(n) => {
                self.advance();
                Expr::Number(n)
            }
            Token::Str(s) => {
                self.advance();
                // Adjacent literals concatenate
                let mut s = s;
                while let Token::Str(next) = self.current() {
                    s.push_str(next);
                    self.advance();
                }
                Expr::Str(s)
            }
            Token::Name(name) => {
                self.advance();
                Expr::Name(name)
            }
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                let expr = if matches!(self.current(), Token::For) {
                    self.parse_comprehension(first)?
                } else if matches!(self.current(), Token::Comma) {
                    let mut items = vec![first];
                    while self.eat(&Token::Comma) {
                        if matches!(self.current(), Token::RParen) {
                            break;
                        }
                        items.push(self.parse_expr()?);
                    }
                    Expr::Tuple(items)
                } else {
                    first
                };
                self.expect(Token::RParen, "')'")?;
                expr
            }
            Token::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !matches!(self.current(), Token::RBracket) {
                    let first = self.parse_expr()?;
                    if matches!(self.current(), Token::For) {
                        let comp = self.parse_comprehension(first)?;
                        self.expect(Token::RBracket, "']'")?;
                        return Ok(comp);
                    }
                    elements.push(first);
                    while self.eat(&Token::Comma) {
                        if matches!(self.current(), Token::RBracket) {
                            break;
                        }
                        elements.push(self.parse_expr()?);
                    }
                }
                self.expect(Token::RBracket, "']'")?;
                Expr::List(elements)
            }
            Token::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                while !matches!(self.current(), Token::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect(Token::Colon, "':' in dict literal")?;
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                Expr::Dict(pairs)
            }
            Token::Reserved("await") => {
                self.advance();
                let inner = self.parse_unary()?;
                Expr::Unsupported {
                    keyword: "await",
                    inner: vec![inner],
                }
            }
            Token::Reserved("yield") => {
                self.advance();
                let inner = if ends_expr_list(self.current()) {
                    Vec::new()
                } else {
                    vec![self.parse_expr_list()?]
                };
                Expr::Unsupported {
                    keyword: "yield",
                    inner,
                }
            }
            Token::Reserved("lambda") => return self.parse_lambda(),
            Token::Eof => return Err(self.error("unexpected end of input")),
            _ => return Err(self.unexpected()),
        };

        Ok(expr)
    }
}

fn is_compound_keyword(kw: &str) -> bool {
    matches!(kw, "def" | "class" | "with" | "try" | "async")
}

fn is_simple_keyword(kw: &str) -> bool {
    matches!(
        kw,
        "return" | "global" | "nonlocal" | "del" | "raise" | "assert"
    )
}

fn ends_expr_list(token: &Token) -> bool {
    matches!(
        token,
        Token::Newline
            | Token::Eof
            | Token::Semicolon
            | Token::Assign
            | Token::RParen
            | Token::RBracket
            | Token::RBrace
            | Token::Dedent
    )
}

fn describe(token: &Token) -> String {
    match token {
        Token::Name(name) => format!("name '{name}'"),
        Token::Number(n) => format!("number {n}"),
        Token::Str(_) => "string literal".into(),
        Token::Reserved(kw) => format!("keyword '{kw}'"),
        Token::Newline => "end of line".into(),
        Token::Indent => "indent".into(),
        Token::Dedent => "dedent".into(),
        Token::Eof => "end of input".into(),
        other => format!("{other:?}").to_lowercase(),
    }
}
