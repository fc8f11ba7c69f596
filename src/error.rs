use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Input-driven errors describe source text the pipeline could not
/// handle (unparsable scripts, shapes a pass does not support, a collaborator that misbehaved).
/// The deobfuscation pipeline catches these and turns them into failed
/// [`TransformationRecord`](crate::deobfuscation::TransformationRecord)s or warnings. Internal
/// errors describe defects in the library itself and are propagated to the caller so they stay
/// visible. Use [`Error::is_input_driven`] to tell them apart.
///
/// # Error Categories
///
/// ## Input-driven
/// - [`Error::Parse`] - The source text is not a valid script
/// - [`Error::Malformed`] - A construct looked like a known pattern but was inconsistent
/// - [`Error::Unsupported`] - A recognised construct uses a shape no pass can handle
/// - [`Error::StepLimit`] - Bounded simulation ran out of steps
/// - [`Error::Collaborator`] - The external cleanup collaborator failed
/// - [`Error::Timeout`] - The external cleanup collaborator did not answer in time
///
/// ## I/O and External Errors
/// - [`Error::Io`] - Filesystem or printer I/O errors
/// - [`Error::Serialization`] - JSON (de)serialization errors
///
/// ## Internal
/// - [`Error::Internal`] - Invariant violation inside the library
///
/// # Examples
///
/// ```rust
/// use jsscope::Error;
///
/// let err = Error::Unsupported("rotation loop with side effects".to_string());
/// assert!(err.is_input_driven());
///
/// let err = Error::Internal("scheduler lost a record".to_string());
/// assert!(!err.is_input_driven());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The source text could not be parsed as a script.
    ///
    /// # Fields
    ///
    /// * `message` - The first diagnostic reported by the parser
    /// * `location` - `line:column` of the diagnostic
    #[error("Parse error at {location}: {message}")]
    Parse {
        /// The parser diagnostic
        message: String,
        /// Where the diagnostic was raised
        location: String,
    },

    /// A construct matched the outline of a known obfuscation pattern but its details were
    /// inconsistent.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A recognised construct uses a shape that the pipeline deliberately does not handle.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    /// A bounded simulation exceeded its step budget.
    ///
    /// The associated value is the limit that was reached.
    #[error("Simulation exceeded the step limit of {0}")]
    StepLimit(usize),

    /// The external cleanup collaborator returned an error.
    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    /// The external cleanup collaborator did not answer within the configured timeout.
    #[error("Collaborator timed out after {0} ms")]
    Timeout(u128),

    /// File or printer I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),

    /// An invariant inside the library was violated.
    ///
    /// This is never caused by input alone and always propagates to the caller.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if this error was caused by the input rather than a library defect.
    ///
    /// Input-driven errors raised by a pass are recorded as failed transformations and the
    /// pipeline continues. Everything else propagates.
    #[must_use]
    pub fn is_input_driven(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. }
                | Error::Malformed { .. }
                | Error::Unsupported(_)
                | Error::StepLimit(_)
                | Error::Collaborator(_)
                | Error::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro_carries_location() {
        let err = malformed_error!("case {} has no body", 3);
        match err {
            Error::Malformed { message, file, line } => {
                assert_eq!(message, "case 3 has no body");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_input_driven_classification() {
        assert!(Error::StepLimit(10_000).is_input_driven());
        assert!(Error::Timeout(5).is_input_driven());
        assert!(!Error::Internal("bug".into()).is_input_driven());
        assert!(!Error::Io(std::io::Error::other("disk")).is_input_driven());
    }
}
