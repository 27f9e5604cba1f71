/// Nested `tex(...)` expressions deeper than this are rejected.
pub(crate) const MAX_NESTING_DEPTH: usize = 16;

/// One texture pipeline: a base image followed by zero or more stages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    pub(crate) base: Base,
    pub(crate) stages: Vec<Call>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Base {
    Tex {
        name: String,
        offset: usize,
    },
    Fill {
        width: i64,
        height: i64,
        color: String,
        offset: usize,
    },
    /// `anim(...)`; arguments are interpreted by the compiler.
    Anim(Call),
    /// `combine(...)`; arguments are interpreted by the compiler.
    Combine(Call),
}

/// `name(args...)`, used for stages and for argument-taking bases.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub(crate) name: String,
    pub(crate) args: Vec<Arg>,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Arg {
    pub(crate) name: Option<String>,
    pub(crate) value: Value,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Int(i64),
    Str(String),
    Ident(String),
    Nested(Box<Pipeline>),
}

impl Value {
    /// Text of a string or identifier value.
    pub(crate) fn as_text(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Ident(s) => Some(s),
            _ => None,
        }
    }
}

impl Call {
    /// Look up an argument by any of `names`, falling back to position `pos`.
    ///
    /// Positional lookup only counts unnamed arguments.
    pub(crate) fn arg(&self, names: &[&str], pos: Option<usize>) -> Option<&Arg> {
        if let Some(a) = self
            .args
            .iter()
            .find(|a| a.name.as_deref().is_some_and(|n| names.contains(&n)))
        {
            return Some(a);
        }
        let pos = pos?;
        self.args.iter().filter(|a| a.name.is_none()).nth(pos)
    }
}
