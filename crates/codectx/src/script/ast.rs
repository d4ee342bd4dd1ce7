//! Syntax tree for the namespace script language.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Fn(Rc<FnDecl>),
    Struct(Rc<StructDecl>),
    Use {
        module: String,
        symbol: String,
        alias: Option<String>,
    },
}

/// A function or method declaration.
#[derive(Debug, Clone)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub ret: Option<TypeExpr>,
    /// `None` for abstract methods declared as `fn name(..);`.
    pub body: Option<Vec<Stmt>>,
    pub doc: Option<String>,
    /// Literal source text, doc comments included.
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    /// Source text of the default expression, for signatures.
    pub default_src: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub base: Option<String>,
    pub is_abstract: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<Rc<FnDecl>>,
    pub doc: Option<String>,
    /// Literal source text, doc comments included.
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    pub default_src: Option<String>,
    pub doc: Option<String>,
}

/// A type annotation: `int`, `list[str]`, `map[str, Point]?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr {
    pub name: String,
    pub args: Vec<TypeExpr>,
    pub optional: bool,
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            optional: false,
        }
    }

    /// Every type name mentioned by this annotation, outermost first.
    pub fn names(&self) -> Vec<&str> {
        let mut out = vec![self.name.as_str()];
        for arg in &self.args {
            out.extend(arg.names());
        }
        out
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("[")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str("]")?;
        }
        if self.optional {
            f.write_str("?")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call { callee: Box<Expr>, args: Vec<Arg> },
}

/// A call argument, optionally passed by keyword.
#[derive(Debug, Clone)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "&&",
            Self::Or => "||",
        };
        f.write_str(symbol)
    }
}
