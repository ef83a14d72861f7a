//! Function signature metadata.
//!
//! The runtime uses the declared return annotation and `throws` flag to decide
//! whether a call site must push an error frame before transfer.

/// Declared type annotation, reduced to what the runtime acts on.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum TypeNote {
    #[default]
    Dynamic,
    /// `T | Err1 | Err2` style fallible return.
    ErrorUnion {
        success: Box<TypeNote>,
        errors: Vec<String>,
    },
    Named(String),
}

impl TypeNote {
    pub fn is_error_union(&self) -> bool {
        matches!(self, TypeNote::ErrorUnion { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub optional: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), optional: false }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), optional: true }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub return_type: TypeNote,
    pub throws: bool,
}

impl FunctionSig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    pub fn total_count(&self) -> usize {
        self.params.len()
    }

    pub fn accepts_argc(&self, argc: usize) -> bool {
        argc >= self.required_count() && argc <= self.total_count()
    }

    /// True when a call to this function must run under an error frame.
    pub fn is_fallible(&self) -> bool {
        self.throws || self.return_type.is_error_union()
    }
}
