use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The arguments were not valid JSON.
    InvalidArguments,
    /// The input provided to the tool did not match its schema.
    InvalidInput,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// No tool is registered with the requested name.
    NotFound,
    /// The tool is registered but disabled.
    Disabled,
    /// The user declined the tool call.
    Declined,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidArguments => write!(f, "Invalid arguments"),
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::NotFound => write!(f, "Tool not found"),
            ErrorKind::Disabled => write!(f, "Tool is disabled"),
            ErrorKind::Declined => write!(f, "declined by user"),
        }
    }
}

/// Describes a tool call error.
///
/// The [`Display`] output is what the model sees as the tool result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    #[inline]
    fn new(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    /// Creates a new error with the `InvalidArguments` kind.
    #[inline]
    pub fn invalid_arguments() -> Self {
        Self::new(ErrorKind::InvalidArguments)
    }

    /// Creates a new error with the `InvalidInput` kind.
    #[inline]
    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput)
    }

    /// Creates a new error with the `ExecutionError` kind.
    #[inline]
    pub fn execution_error() -> Self {
        Self::new(ErrorKind::ExecutionError)
    }

    /// Creates a new error with the `NotFound` kind for the tool `name`.
    #[inline]
    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorKind::NotFound)
            .with_reason(format!("Tool not found: {name}"))
    }

    /// Creates a new error with the `Disabled` kind for the tool `name`.
    #[inline]
    pub fn disabled(name: &str) -> Self {
        Self::new(ErrorKind::Disabled)
            .with_reason(format!("Tool is disabled: {name}"))
    }

    /// Creates a new error with the `Declined` kind.
    #[inline]
    pub fn declined() -> Self {
        Self::new(ErrorKind::Declined)
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::InvalidArguments
            | ErrorKind::InvalidInput
            | ErrorKind::ExecutionError
                if self.reason.is_some() =>
            {
                write!(f, "{}: {}", self.kind, self.reason())
            }
            _ => f.write_str(&self.reason()),
        }
    }
}

impl StdError for Error {}
