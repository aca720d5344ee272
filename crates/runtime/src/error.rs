#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("out of memory in rho heap")]
    OutOfMemory,
    #[error("object '{0}' not found")]
    UnboundVariable(String),
    #[error("argument is missing, with no default")]
    MissingArgument,
    #[error("attempt to apply non-function")]
    NotAFunction,
    #[error("missing value where TRUE/FALSE needed")]
    NaWhereTestNeeded,
    #[error("deoptimized with no handler installed")]
    DeoptWithoutHandler,
    #[error("{0}")]
    Other(String),
}

/// Payload carried by the non-returning builtins (`error`, failed lookups)
/// while unwinding to the compiled-code call boundary.
#[derive(Debug)]
pub struct Unwind(pub Error);
