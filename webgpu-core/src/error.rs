//! Error classification and the per-device error scope stack.

use std::{error::Error as StdError, fmt, sync::Arc};

use crate::signal::{Signal, SignalFuture};

/// How an error travels back to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Misuse of the API state machine. Returned synchronously from the
    /// offending call and never routed to an error scope.
    Usage,
    /// The call broke a WebGPU validation rule.
    Validation,
    /// The backend ran out of memory.
    OutOfMemory,
    /// The backend failed for a reason that is not the user's fault.
    Internal,
    /// The device is lost; nothing is reported, the lost signal says it all.
    DeviceLost,
}

/// Classification of every error this crate produces.
pub trait WebGpuError: StdError + Send + Sync + 'static {
    fn webgpu_error_type(&self) -> ErrorType;
}

/// An error as seen by error scopes and the uncaptured error handler.
#[derive(Clone, Debug)]
pub enum Error {
    Validation {
        source: Arc<dyn StdError + Send + Sync + 'static>,
        description: String,
    },
    /// Shader source failed to parse or validate.
    Compilation {
        source: Arc<dyn StdError + Send + Sync + 'static>,
        description: String,
    },
    OutOfMemory {
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },
    Internal {
        source: Arc<dyn StdError + Send + Sync + 'static>,
        description: String,
    },
}

impl Error {
    /// The error scope filter that captures this error.
    pub fn filter(&self) -> wgt::ErrorFilter {
        match *self {
            Self::Validation { .. } | Self::Compilation { .. } => wgt::ErrorFilter::Validation,
            Self::OutOfMemory { .. } => wgt::ErrorFilter::OutOfMemory,
            Self::Internal { .. } => wgt::ErrorFilter::Internal,
        }
    }

    pub fn description(&self) -> &str {
        match *self {
            Self::Validation {
                ref description, ..
            }
            | Self::Compilation {
                ref description, ..
            }
            | Self::Internal {
                ref description, ..
            } => description,
            Self::OutOfMemory { .. } => "Out of Memory",
        }
    }

    /// The innermost error of the chain, downcast to `E`.
    pub fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut source: Option<&(dyn StdError + 'static)> = Some(self.source_ref());
        while let Some(error) = source {
            if let Some(found) = error.downcast_ref::<E>() {
                return Some(found);
            }
            source = error.source();
        }
        None
    }

    fn source_ref(&self) -> &(dyn StdError + 'static) {
        match *self {
            Self::Validation { ref source, .. }
            | Self::Compilation { ref source, .. }
            | Self::OutOfMemory { ref source }
            | Self::Internal { ref source, .. } => source.as_ref(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OutOfMemory { .. } => f.write_str("Out of Memory"),
            _ => f.write_str(self.description()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source_ref())
    }
}

/// Names the entry point and the object an error was raised for.
#[derive(Debug)]
pub struct ContextError {
    pub fn_ident: &'static str,
    pub cause: Box<dyn StdError + Send + Sync + 'static>,
    pub label: String,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "In {}", self.fn_ident)
    }
}

impl StdError for ContextError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

pub fn format_error_line(err: &dyn fmt::Display) -> String {
    format!("    {err}\n")
}

pub fn format_note_line(note: &dyn fmt::Display) -> String {
    format!("      note: {note}\n")
}

pub fn format_label_line(label_key: &str, label_value: &str) -> String {
    if label_key.is_empty() || label_value.is_empty() {
        String::new()
    } else {
        format_note_line(&format!("{label_key} = `{label_value}`"))
    }
}

fn format_pretty_any(error: &(dyn StdError + 'static)) -> String {
    if let Some(context) = error.downcast_ref::<ContextError>() {
        return format_error_line(context) + &format_label_line("label", &context.label);
    }
    format_error_line(&error)
}

/// Render the whole `source()` chain of `err`, one line per level.
pub fn format_error(header: &str, err: &(dyn StdError + 'static)) -> String {
    let mut err_descs = vec![format_pretty_any(err)];

    let mut source_opt = err.source();
    while let Some(source) = source_opt {
        err_descs.push(format_pretty_any(source));
        source_opt = source.source();
    }

    format!("{header}\n\nCaused by:\n{}", err_descs.join(""))
}

impl Error {
    /// Wrap `cause` into the error a scope receives.
    pub(crate) fn from_cause(
        fn_ident: &'static str,
        label: &str,
        cause: impl WebGpuError,
    ) -> Option<Self> {
        let ty = cause.webgpu_error_type();
        let context = ContextError {
            fn_ident,
            cause: Box::new(cause),
            label: label.to_string(),
        };
        Some(match ty {
            ErrorType::Validation => Self::Validation {
                description: format_error("Validation Error", &context),
                source: Arc::new(context),
            },
            ErrorType::OutOfMemory => Self::OutOfMemory {
                source: Arc::new(context),
            },
            ErrorType::Internal => Self::Internal {
                description: format_error("Internal Error", &context),
                source: Arc::new(context),
            },
            ErrorType::Usage | ErrorType::DeviceLost => return None,
        })
    }

    pub(crate) fn compilation(
        fn_ident: &'static str,
        label: &str,
        cause: impl WebGpuError,
    ) -> Self {
        let context = ContextError {
            fn_ident,
            cause: Box::new(cause),
            label: label.to_string(),
        };
        Self::Compilation {
            description: format_error("Shader Compilation Error", &context),
            source: Arc::new(context),
        }
    }
}

/// Receives every error no error scope captured.
pub type UncapturedErrorHandler = Arc<dyn Fn(Error) + Send + Sync + 'static>;

fn default_error_handler(err: Error) {
    log::error!("Uncaptured webgpu error: {err}");
}

/// Future returned by `Device::pop_error_scope`.
pub type PopErrorScopeFuture = SignalFuture<Option<Error>>;

#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PopErrorScopeError {
    #[error("The error scope stack is empty")]
    Empty,
}

impl WebGpuError for PopErrorScopeError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Usage
    }
}

#[derive(Debug)]
struct ErrorScope {
    error: Option<Error>,
    filter: wgt::ErrorFilter,
}

/// Stack of error scopes of one device, plus the handler for whatever
/// falls through all of them.
pub(crate) struct ErrorSink {
    scopes: Vec<ErrorScope>,
    uncaptured_handler: UncapturedErrorHandler,
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl ErrorSink {
    pub(crate) fn new() -> Self {
        Self {
            scopes: Vec::new(),
            uncaptured_handler: Arc::new(default_error_handler),
        }
    }

    pub(crate) fn push(&mut self, filter: wgt::ErrorFilter) {
        self.scopes.push(ErrorScope {
            error: None,
            filter,
        });
    }

    pub(crate) fn pop(&mut self) -> Result<Option<Error>, PopErrorScopeError> {
        let scope = self.scopes.pop().ok_or(PopErrorScopeError::Empty)?;
        Ok(scope.error)
    }

    /// Route `err` to the innermost scope with a matching filter.
    ///
    /// When no scope matches, the handler to call is returned along with the
    /// error, so it can run without the sink locked.
    pub(crate) fn handle_error(&mut self, err: Error) -> Option<(UncapturedErrorHandler, Error)> {
        let filter = err.filter();
        match self
            .scopes
            .iter_mut()
            .rev()
            .find(|scope| scope.filter == filter)
        {
            Some(scope) => {
                if scope.error.is_none() {
                    scope.error = Some(err);
                }
                None
            }
            None => Some((Arc::clone(&self.uncaptured_handler), err)),
        }
    }

    pub(crate) fn set_uncaptured_handler(&mut self, handler: UncapturedErrorHandler) {
        self.uncaptured_handler = handler;
    }

    /// Resolve a popped scope into the future handed to the user.
    pub(crate) fn resolved_future(error: Option<Error>) -> PopErrorScopeFuture {
        Signal::resolved(error).future()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("Size {0} is too big")]
    struct TooBig(u64);

    impl WebGpuError for TooBig {
        fn webgpu_error_type(&self) -> ErrorType {
            ErrorType::Validation
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("Ran out")]
    struct RanOut;

    impl WebGpuError for RanOut {
        fn webgpu_error_type(&self) -> ErrorType {
            ErrorType::OutOfMemory
        }
    }

    fn validation(size: u64) -> Error {
        Error::from_cause("Device::create_buffer", "staging", TooBig(size)).unwrap()
    }

    #[test]
    fn description_walks_the_chain() {
        let error = validation(5);
        let description = error.description();
        assert!(description.starts_with("Validation Error"));
        assert!(description.contains("In Device::create_buffer"));
        assert!(description.contains("label = `staging`"));
        assert!(description.contains("Size 5 is too big"));
        assert_eq!(error.find_source::<TooBig>().map(|e| e.0), Some(5));
    }

    #[test]
    fn innermost_matching_scope_captures_first_error() {
        let mut sink = ErrorSink::new();
        sink.push(wgt::ErrorFilter::Validation);
        sink.push(wgt::ErrorFilter::OutOfMemory);

        assert!(sink.handle_error(validation(1)).is_none());
        assert!(sink.handle_error(validation(2)).is_none());
        let oom = Error::from_cause("Device::create_texture", "", RanOut).unwrap();
        assert!(sink.handle_error(oom).is_none());

        assert!(matches!(
            sink.pop(),
            Ok(Some(Error::OutOfMemory { .. }))
        ));
        let captured = sink.pop().unwrap().unwrap();
        assert_eq!(captured.find_source::<TooBig>().map(|e| e.0), Some(1));
        assert!(matches!(sink.pop(), Err(PopErrorScopeError::Empty)));
    }

    #[test]
    fn unmatched_errors_go_to_the_handler() {
        let mut sink = ErrorSink::new();
        sink.push(wgt::ErrorFilter::Internal);
        let (handler, error) = sink.handle_error(validation(3)).unwrap();
        assert_eq!(error.filter(), wgt::ErrorFilter::Validation);
        handler(error);
        assert!(matches!(sink.pop(), Ok(None)));
    }

    #[test]
    fn usage_errors_are_not_routed() {
        assert!(Error::from_cause("Device::pop_error_scope", "", PopErrorScopeError::Empty).is_none());
    }
}
