//! Capability registry descriptors.
//!
//! Host functions and host types carry their own name, parameters, and
//! documentation as static data. The reflector renders prompts from these
//! descriptors the same way it renders script declarations.

use crate::script::ast::{FieldDecl, FnDecl};

/// One parameter of a function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: Option<String>,
    /// Source text of the default value.
    pub default: Option<String>,
}

/// Signature and documentation of a callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub returns: Option<String>,
    pub doc: Option<String>,
    /// Module the function is exported from.
    pub module: Option<String>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            doc: None,
            module: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: Option<&str>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty: ty.map(str::to_string),
            default: None,
        });
        self
    }

    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        ty: Option<&str>,
        default: impl Into<String>,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty: ty.map(str::to_string),
            default: Some(default.into()),
        });
        self
    }

    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.returns = Some(ty.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }
}

impl From<&FnDecl> for FunctionSpec {
    fn from(decl: &FnDecl) -> Self {
        Self {
            name: decl.name.clone(),
            params: decl
                .params
                .iter()
                .map(|p| ParamSpec {
                    name: p.name.clone(),
                    ty: p.ty.as_ref().map(ToString::to_string),
                    default: p.default_src.clone(),
                })
                .collect(),
            returns: decl.ret.as_ref().map(ToString::to_string),
            doc: decl.doc.clone(),
            module: None,
        }
    }
}

/// A field of a host type or script struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: Option<String>,
    pub default: Option<String>,
    pub doc: Option<String>,
}

impl From<&FieldDecl> for FieldSpec {
    fn from(decl: &FieldDecl) -> Self {
        Self {
            name: decl.name.clone(),
            ty: decl.ty.as_ref().map(ToString::to_string),
            default: decl.default_src.clone(),
            doc: decl.doc.clone(),
        }
    }
}

/// Descriptor of a host type exposed to scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    pub name: String,
    pub doc: Option<String>,
    pub module: Option<String>,
    pub extends: Vec<String>,
    pub fields: Vec<FieldSpec>,
    pub methods: Vec<FunctionSpec>,
    /// Non-instantiable types are interfaces; they never reflect as
    /// persistable records.
    pub instantiable: bool,
}

impl TypeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
            module: None,
            extends: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            instantiable: true,
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends.push(base.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty: Some(ty.into()),
            default: None,
            doc: None,
        });
        self
    }

    pub fn method(mut self, method: FunctionSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn instantiable(mut self, instantiable: bool) -> Self {
        self.instantiable = instantiable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::Stmt;
    use crate::script::parse;

    #[test]
    fn function_spec_from_declaration() {
        let program = parse("/// Doc.\nfn f(a: int, b = [1, 2]) -> str { return \"\"; }").unwrap();
        let Stmt::Fn(decl) = &program.stmts[0] else {
            panic!("expected fn");
        };
        let spec = FunctionSpec::from(&**decl);
        assert_eq!(spec.params[0].ty.as_deref(), Some("int"));
        assert_eq!(spec.params[1].default.as_deref(), Some("[1, 2]"));
        assert_eq!(spec.returns.as_deref(), Some("str"));
        assert_eq!(spec.doc.as_deref(), Some("Doc."));
    }

    #[test]
    fn type_spec_builder() {
        let spec = TypeSpec::new("Database")
            .module("storage")
            .field("url", "str")
            .method(FunctionSpec::new("query").param("sql", Some("str")))
            .instantiable(false);
        assert_eq!(spec.fields.len(), 1);
        assert_eq!(spec.methods[0].name, "query");
        assert!(!spec.instantiable);
    }
}
