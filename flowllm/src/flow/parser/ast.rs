//! AST and the Pratt parser for one source line.

use serde_json::Value;

use super::lexer::Token;
use super::ParseError;

/// Binary composition operator, in increasing binding power:
/// `>>` (10) < `|` (20) < `<<` (30). All left-associative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Seq,
    Par,
    Child,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Constructor call with keyword arguments, e.g. `LenOp(tool_index=1)`.
    Call { name: String, args: Vec<(String, Value)> },
    /// Reference to a variable bound earlier in the program.
    Var(String),
    /// Bare literal; legal syntax, but not an op at evaluation time.
    Literal(Value),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// `var = expr`
    Assign { var: String, expr: Expr },
    /// `var.ops.NAME = expr`
    AttrAssign {
        var: String,
        child: String,
        expr: Expr,
    },
    /// Bare expression; only legal as the last line.
    Expr(Expr),
}

/// Parses one line of tokens into a statement.
pub fn parse_line(line: usize, tokens: Vec<Token>) -> Result<Stmt, ParseError> {
    let mut parser = LineParser { tokens, pos: 0, line };
    let stmt = parser.parse_stmt()?;
    parser.expect_end()?;
    Ok(stmt)
}

struct LineParser {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl LineParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseError> {
        match self.advance() {
            Some(token) if &token == expected => Ok(()),
            Some(token) => Err(self.error(format!("expected {what}, got {token:?}"))),
            None => Err(self.error(format!("expected {what}, got end of line"))),
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected trailing {token:?}"))),
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        // `var = expr`
        if matches!(self.peek(), Some(Token::Ident(_)))
            && matches!(self.peek_at(1), Some(Token::Assign))
        {
            let Some(Token::Ident(var)) = self.advance() else {
                unreachable!("peek checked an identifier");
            };
            self.advance(); // `=`
            let expr = self.parse_expr(0)?;
            return Ok(Stmt::Assign { var, expr });
        }

        // `var.ops.NAME = expr`
        if matches!(self.peek(), Some(Token::Ident(_)))
            && matches!(self.peek_at(1), Some(Token::Dot))
        {
            let Some(Token::Ident(var)) = self.advance() else {
                unreachable!("peek checked an identifier");
            };
            self.advance(); // `.`
            match self.advance() {
                Some(Token::Ident(attr)) if attr == "ops" => {}
                other => {
                    return Err(self.error(format!(
                        "only `.ops.NAME = ...` attribute assignment is supported, got {other:?}"
                    )))
                }
            }
            self.expect(&Token::Dot, "`.`")?;
            let child = match self.advance() {
                Some(Token::Ident(child)) => child,
                other => return Err(self.error(format!("expected child name, got {other:?}"))),
            };
            self.expect(&Token::Assign, "`=`")?;
            let expr = self.parse_expr(0)?;
            return Ok(Stmt::AttrAssign { var, child, expr });
        }

        Ok(Stmt::Expr(self.parse_expr(0)?))
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_primary()?;
        loop {
            let (op, bp) = match self.peek() {
                Some(Token::Shr) => (BinOp::Seq, 10),
                Some(Token::Pipe) => (BinOp::Par, 20),
                Some(Token::Shl) => (BinOp::Child, 30),
                _ => break,
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr(bp + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_expr(0)?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.parse_call_args()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(other) => Err(self.error(format!("unexpected {other:?}"))),
            None => Err(self.error("unexpected end of line")),
        }
    }

    /// Keyword arguments only: `name=literal, ...`.
    fn parse_call_args(&mut self) -> Result<Vec<(String, Value)>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            let key = match self.advance() {
                Some(Token::Ident(key)) => key,
                other => {
                    return Err(self.error(format!(
                        "constructor arguments must be keyword arguments, got {other:?}"
                    )))
                }
            };
            self.expect(&Token::Assign, "`=`")?;
            let value = match self.advance() {
                Some(Token::Int(n)) => Value::from(n),
                Some(Token::Float(f)) => serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                Some(Token::Str(s)) => Value::String(s),
                Some(Token::Bool(b)) => Value::Bool(b),
                other => {
                    return Err(self.error(format!(
                        "constructor argument `{key}` must be a literal, got {other:?}"
                    )))
                }
            };
            args.push((key, value));
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => return Err(self.error(format!("expected `,` or `)`, got {other:?}"))),
            }
        }
        Ok(args)
    }
}
