use object::Value;

/// Argument-binding failures raised by the keyword binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error(
        "wrong number of arguments: got {nargs}, expected at least {nreq} and at most {max}"
    )]
    WrongNumberOfArgs { nargs: usize, nreq: usize, max: usize },
    #[error("unrecognized keyword {keyword:?}")]
    UnrecognizedKeyword { keyword: Value },
    #[error("invalid keyword {value:?}")]
    InvalidKeyword { value: Value },
    #[error("keyword argument {keyword:?} is missing a value")]
    MissingKeywordValue { keyword: Value },
}

/// Errors that escape compiled code back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Bind(#[from] BindError),
    /// A procedure transferred control to an outer prompt.
    #[error("non-local exit to {tag:?}")]
    NonLocalExit { tag: Value },
    #[error("wrong type to apply: {procedure:?}")]
    NotApplicable { procedure: Value },
}
