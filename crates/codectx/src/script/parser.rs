//! Recursive-descent parser producing a [`Program`].
//!
//! Statements end with `;`, which may be omitted before a closing `}` or at
//! the end of input. Function and struct declarations keep their literal
//! source text (including leading `///` doc comments) so the reflector can
//! render them verbatim.
//!
//! Nesting of blocks, expressions, and operator chains is bounded so that
//! neither parsing nor evaluation can exhaust the stack.

use super::ast::{
    Arg, BinaryOp, Expr, FieldDecl, FnDecl, ParamDecl, Program, Stmt, StructDecl, TypeExpr,
    UnaryOp,
};
use super::lexer::{Spanned, Token, line_col, tokenize};
use crate::error::ScriptError;
use std::rc::Rc;

/// Deepest syntactic nesting accepted before parsing fails.
pub const MAX_NESTING: usize = 256;

/// Parse a complete source text.
pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut stmts = Vec::new();
    while !parser.at_end() {
        if let Some(stmt) = parser.statement()? {
            stmts.push(stmt);
        }
    }
    Ok(Program { stmts })
}

struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    // ── Token cursor ───────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ScriptError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    /// Byte offset where the current token starts.
    fn here(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.span.start)
            .unwrap_or(self.source.len())
    }

    /// Byte offset where the previous token ends.
    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|s| s.span.end)
            .unwrap_or(0)
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.source.get(start..end).unwrap_or_default().to_string()
    }

    fn error(&self, message: String) -> ScriptError {
        let (line, column) = line_col(self.source, self.here());
        let found = match self.peek() {
            Some(token) => format!("{token:?}"),
            None => "end of input".to_string(),
        };
        ScriptError::Syntax {
            line,
            column,
            message: format!("{message}, found {found}"),
        }
    }

    /// Open one nesting level; the caller closes it with `self.depth -= 1`.
    /// Levels left open by an error don't matter, as parsing stops there.
    fn descend(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        Ok(())
    }

    fn docs(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        while let Some(Token::Doc(text)) = self.peek() {
            lines.push(text.clone());
            self.pos += 1;
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    fn end_statement(&mut self) -> Result<(), ScriptError> {
        if self.eat(&Token::Semi) || self.at_end() || self.check(&Token::RBrace) {
            Ok(())
        } else {
            Err(self.error("expected `;`".to_string()))
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Option<Stmt>, ScriptError> {
        let start = self.here();
        let doc = self.docs();
        let Some(token) = self.peek().cloned() else {
            return Ok(None);
        };
        if token == Token::RBrace && doc.is_some() {
            return Ok(None);
        }
        let stmt = match token {
            Token::Fn => Stmt::Fn(Rc::new(self.function(start, doc, false)?)),
            Token::Struct | Token::Abstract => Stmt::Struct(Rc::new(self.structure(start, doc)?)),
            Token::Let => {
                self.pos += 1;
                let name = self.ident("variable name after `let`")?;
                let ty = if self.eat(&Token::Colon) {
                    Some(self.type_expr()?)
                } else {
                    None
                };
                self.expect(&Token::Assign, "`=` in `let`")?;
                let value = self.expr()?;
                self.end_statement()?;
                Stmt::Let { name, ty, value }
            }
            Token::Return => {
                self.pos += 1;
                let value = if self.check(&Token::Semi) || self.check(&Token::RBrace) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.end_statement()?;
                Stmt::Return(value)
            }
            Token::If => self.if_statement()?,
            Token::While => {
                self.pos += 1;
                let cond = self.expr()?;
                let body = self.block()?;
                Stmt::While { cond, body }
            }
            Token::For => {
                self.pos += 1;
                let var = self.ident("loop variable")?;
                self.expect(&Token::In, "`in`")?;
                let iter = self.expr()?;
                let body = self.block()?;
                Stmt::For { var, iter, body }
            }
            Token::Break => {
                self.pos += 1;
                self.end_statement()?;
                Stmt::Break
            }
            Token::Continue => {
                self.pos += 1;
                self.end_statement()?;
                Stmt::Continue
            }
            Token::Use => self.use_statement()?,
            _ => {
                let target = self.expr()?;
                if self.eat(&Token::Assign) {
                    if !matches!(target, Expr::Ident(_) | Expr::Attr(..) | Expr::Index(..)) {
                        return Err(self.error("invalid assignment target".to_string()));
                    }
                    let value = self.expr()?;
                    self.end_statement()?;
                    Stmt::Assign { target, value }
                } else {
                    self.end_statement()?;
                    Stmt::Expr(target)
                }
            }
        };
        Ok(Some(stmt))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&Token::LBrace, "`{`")?;
        self.descend()?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error("unclosed block".to_string()));
            }
            if let Some(stmt) = self.statement()? {
                stmts.push(stmt);
            }
        }
        self.pos += 1;
        self.depth -= 1;
        Ok(stmts)
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect(&Token::If, "`if`")?;
        self.descend()?;
        let cond = self.expr()?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                Some(vec![self.if_statement()?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        self.depth -= 1;
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn use_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect(&Token::Use, "`use`")?;
        let mut module = self.ident("module path")?;
        while self.eat(&Token::Dot) {
            module.push('.');
            module.push_str(&self.ident("module path segment")?);
        }
        self.expect(&Token::PathSep, "`::` before the imported symbol")?;
        let symbol = self.ident("imported symbol")?;
        let alias = if self.eat(&Token::As) {
            Some(self.ident("alias after `as`")?)
        } else {
            None
        };
        self.end_statement()?;
        Ok(Stmt::Use {
            module,
            symbol,
            alias,
        })
    }

    // ── Declarations ───────────────────────────────────────────────

    fn function(
        &mut self,
        start: usize,
        doc: Option<String>,
        in_struct: bool,
    ) -> Result<FnDecl, ScriptError> {
        self.expect(&Token::Fn, "`fn`")?;
        let name = self.ident("function name")?;
        self.expect(&Token::LParen, "`(`")?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let param_name = self.ident("parameter name")?;
            let ty = if self.eat(&Token::Colon) {
                Some(self.type_expr()?)
            } else {
                None
            };
            let (default, default_src) = if self.eat(&Token::Assign) {
                let expr_start = self.here();
                let expr = self.expr()?;
                (Some(expr), Some(self.slice(expr_start, self.prev_end())))
            } else {
                (None, None)
            };
            params.push(ParamDecl {
                name: param_name,
                ty,
                default,
                default_src,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "`)` after parameters")?;
        let ret = if self.eat(&Token::Arrow) {
            Some(self.type_expr()?)
        } else {
            None
        };
        let body = if self.check(&Token::LBrace) {
            Some(self.block()?)
        } else if in_struct && self.eat(&Token::Semi) {
            None
        } else {
            return Err(self.error("expected function body".to_string()));
        };
        Ok(FnDecl {
            name,
            params,
            ret,
            body,
            doc,
            source: self.slice(start, self.prev_end()),
        })
    }

    fn structure(&mut self, start: usize, doc: Option<String>) -> Result<StructDecl, ScriptError> {
        let is_abstract = self.eat(&Token::Abstract);
        self.expect(&Token::Struct, "`struct`")?;
        let name = self.ident("struct name")?;
        let base = if self.eat(&Token::Extends) {
            Some(self.ident("base struct name")?)
        } else {
            None
        };
        self.expect(&Token::LBrace, "`{`")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error("unclosed struct body".to_string()));
            }
            let member_start = self.here();
            let member_doc = self.docs();
            if self.check(&Token::Fn) {
                methods.push(Rc::new(self.function(member_start, member_doc, true)?));
                continue;
            }
            let field_name = self.ident("field name")?;
            let ty = if self.eat(&Token::Colon) {
                Some(self.type_expr()?)
            } else {
                None
            };
            let (default, default_src) = if self.eat(&Token::Assign) {
                let expr_start = self.here();
                let expr = self.expr()?;
                (Some(expr), Some(self.slice(expr_start, self.prev_end())))
            } else {
                (None, None)
            };
            fields.push(FieldDecl {
                name: field_name,
                ty,
                default,
                default_src,
                doc: member_doc,
            });
            if !self.eat(&Token::Comma) {
                self.eat(&Token::Semi);
            }
        }
        self.pos += 1;
        Ok(StructDecl {
            name,
            base,
            is_abstract,
            fields,
            methods,
            doc,
            source: self.slice(start, self.prev_end()),
        })
    }

    fn type_expr(&mut self) -> Result<TypeExpr, ScriptError> {
        let name = if self.eat(&Token::Nil) {
            "nil".to_string()
        } else {
            self.ident("type name")?
        };
        let mut args = Vec::new();
        if self.eat(&Token::LBracket) {
            self.descend()?;
            while !self.check(&Token::RBracket) {
                args.push(self.type_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RBracket, "`]` after type arguments")?;
            self.depth -= 1;
        }
        let optional = self.eat(&Token::Question);
        Ok(TypeExpr {
            name,
            args,
            optional,
        })
    }

    // ── Expressions ────────────────────────────────────────────────

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        self.descend()?;
        let expr = self.binary(0)?;
        self.depth -= 1;
        Ok(expr)
    }

    /// Precedence climbing over the binary operator table. Each operator
    /// in a chain deepens the left-nested tree, so it counts as a level.
    fn binary(&mut self, min_level: usize) -> Result<Expr, ScriptError> {
        const LEVELS: usize = 6;
        if min_level >= LEVELS {
            return self.unary();
        }
        let mut left = self.binary(min_level + 1)?;
        let mut chain = 0;
        while let Some(op) = self.peek().and_then(|t| binary_op(t, min_level)) {
            self.descend()?;
            chain += 1;
            self.pos += 1;
            let right = self.binary(min_level + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= chain;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else if self.eat(&Token::Bang) {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        let mut chain = 0;
        loop {
            if matches!(
                self.peek(),
                Some(Token::LParen | Token::Dot | Token::LBracket)
            ) {
                self.descend()?;
                chain += 1;
            }
            if self.eat(&Token::LParen) {
                let args = self.call_args()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.eat(&Token::Dot) {
                let name = self.ident("attribute name after `.`")?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(&Token::RBracket, "`]`")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                self.depth -= chain;
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, ScriptError> {
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Ident(name)), Some(Token::Colon)) => Some(name.clone()),
                _ => None,
            };
            if keyword.is_some() {
                self.pos += 2;
            }
            let value = self.expr()?;
            args.push(Arg {
                name: keyword,
                value,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "`)` after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected expression".to_string()));
        };
        let expr = match token {
            Token::Int(v) => Expr::Int(v),
            Token::Float(v) => Expr::Float(v),
            Token::Str(s) => Expr::Str(Rc::from(s.as_str())),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Nil => Expr::Nil,
            Token::Ident(name) => Expr::Ident(name),
            Token::LParen => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(&Token::RParen, "`)`")?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "`]` after list items")?;
                return Ok(Expr::List(items));
            }
            Token::LBrace => {
                self.pos += 1;
                let mut entries = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key = match (self.peek(), self.peek_at(1)) {
                        (Some(Token::Ident(name)), Some(Token::Colon)) => {
                            let key = Expr::Str(Rc::from(name.as_str()));
                            self.pos += 1;
                            key
                        }
                        _ => self.expr()?,
                    };
                    self.expect(&Token::Colon, "`:` after map key")?;
                    let value = self.expr()?;
                    entries.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace, "`}` after map entries")?;
                return Ok(Expr::Map(entries));
            }
            _ => return Err(self.error("expected expression".to_string())),
        };
        self.advance();
        Ok(expr)
    }
}

fn binary_op(token: &Token, level: usize) -> Option<BinaryOp> {
    let op = match (level, token) {
        (0, Token::OrOr) => BinaryOp::Or,
        (1, Token::AndAnd) => BinaryOp::And,
        (2, Token::EqEq) => BinaryOp::Eq,
        (2, Token::NotEq) => BinaryOp::NotEq,
        (3, Token::Lt) => BinaryOp::Lt,
        (3, Token::LtEq) => BinaryOp::LtEq,
        (3, Token::Gt) => BinaryOp::Gt,
        (3, Token::GtEq) => BinaryOp::GtEq,
        (4, Token::Plus) => BinaryOp::Add,
        (4, Token::Minus) => BinaryOp::Sub,
        (5, Token::Star) => BinaryOp::Mul,
        (5, Token::Slash) => BinaryOp::Div,
        (5, Token::Percent) => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_keeps_source_and_doc() {
        let src = "/// Adds one.\nfn inc(x: int, step = 1) -> int {\n    return x + step;\n}\n";
        let program = parse(src).unwrap();
        let Stmt::Fn(decl) = &program.stmts[0] else {
            panic!("expected fn");
        };
        assert_eq!(decl.name, "inc");
        assert_eq!(decl.doc.as_deref(), Some("Adds one."));
        assert_eq!(decl.params.len(), 2);
        assert_eq!(decl.params[1].default_src.as_deref(), Some("1"));
        assert_eq!(decl.ret.as_ref().map(|t| t.to_string()), Some("int".into()));
        assert!(decl.source.starts_with("/// Adds one.\nfn inc("));
        assert!(decl.source.ends_with('}'));
    }

    #[test]
    fn struct_with_fields_and_methods() {
        let src = "abstract struct Shape extends Base {\n    /// Width.\n    w: float = 1.0,\n    h: float\n    fn area(self) -> float;\n}";
        let program = parse(src).unwrap();
        let Stmt::Struct(decl) = &program.stmts[0] else {
            panic!("expected struct");
        };
        assert!(decl.is_abstract);
        assert_eq!(decl.base.as_deref(), Some("Base"));
        assert_eq!(decl.fields.len(), 2);
        assert_eq!(decl.fields[0].doc.as_deref(), Some("Width."));
        assert_eq!(decl.methods.len(), 1);
        assert!(decl.methods[0].body.is_none());
    }

    #[test]
    fn precedence() {
        let program = parse("x = 1 + 2 * 3 == 7 && !done;").unwrap();
        let Stmt::Assign { value, .. } = &program.stmts[0] else {
            panic!("expected assignment");
        };
        let Expr::Binary(BinaryOp::And, left, _) = value else {
            panic!("expected && at the top");
        };
        assert!(matches!(**left, Expr::Binary(BinaryOp::Eq, _, _)));
    }

    #[test]
    fn keyword_arguments_and_maps() {
        let program = parse(r#"p = Point(1, y: 2); m = {a: 1, "b": [1, 2]};"#).unwrap();
        let Stmt::Assign { value, .. } = &program.stmts[0] else {
            panic!("expected assignment");
        };
        let Expr::Call { args, .. } = value else {
            panic!("expected call");
        };
        assert!(args[0].name.is_none());
        assert_eq!(args[1].name.as_deref(), Some("y"));
        assert!(matches!(&program.stmts[1], Stmt::Assign { value: Expr::Map(entries), .. } if entries.len() == 2));
    }

    #[test]
    fn use_with_alias() {
        let program = parse("use tools.math::plus as add;").unwrap();
        assert!(matches!(
            &program.stmts[0],
            Stmt::Use { module, symbol, alias: Some(alias) }
                if module == "tools.math" && symbol == "plus" && alias == "add"
        ));
    }

    #[test]
    fn semicolon_optional_before_brace() {
        assert!(parse("fn f(x) { return x + 1 }").is_ok());
        assert!(parse("let a = 1 let b = 2;").is_err());
    }

    #[test]
    fn else_if_chains() {
        let program = parse("if a { x = 1; } else if b { x = 2; } else { x = 3; }").unwrap();
        let Stmt::If { otherwise: Some(rest), .. } = &program.stmts[0] else {
            panic!("expected if");
        };
        assert!(matches!(rest[0], Stmt::If { otherwise: Some(_), .. }));
    }

    fn is_nesting_error(err: ScriptError) -> bool {
        matches!(err, ScriptError::Syntax { message, .. } if message.contains("nesting deeper"))
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("x = {}1{};", "(".repeat(20_000), ")".repeat(20_000));
        assert!(is_nesting_error(parse(&parens).unwrap_err()));

        let negations = format!("x = {}1;", "-".repeat(20_000));
        assert!(is_nesting_error(parse(&negations).unwrap_err()));

        let blocks = format!("{}{}", "if a { ".repeat(20_000), "}".repeat(20_000));
        assert!(is_nesting_error(parse(&blocks).unwrap_err()));

        let chain = format!("x = 1{};", " + 1".repeat(20_000));
        assert!(is_nesting_error(parse(&chain).unwrap_err()));
    }

    #[test]
    fn ordinary_nesting_still_parses() {
        let parens = format!("x = {}1{};", "(".repeat(50), ")".repeat(50));
        assert!(parse(&parens).is_ok());
        let chain = format!("x = 1{};", " + 1".repeat(100));
        assert!(parse(&chain).is_ok());
        // Sibling expressions don't add up.
        let items = vec!["[[1]]"; 1_000].join(", ");
        assert!(parse(&format!("x = [{items}];")).is_ok());
    }
}
