use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        $crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic error type covering every failure this library can report.
///
/// Variants map onto the stages of the pipeline: file ingestion, PE container
/// parsing, VB metadata parsing, instruction decoding, and IR lifting. Parsing
/// errors are fatal to the current file; lifting errors are fatal only to the
/// current procedure and the pipeline degrades to a placeholder for it.
///
/// # Examples
///
/// ```rust,no_run
/// use std::path::Path;
/// use vbscope::{Error, File};
///
/// match File::from_file(Path::new("program.exe")) {
///     Ok(file) => println!("loaded {} sections", file.sections().len()),
///     Err(Error::NotSupported(why)) => eprintln!("unsupported input: {why}"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("malformed file: {message} ({file}:{line})");
///     }
///     Err(e) => eprintln!("error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// Carries the source location where the malformation was detected,
    /// via the internal `malformed_error!` macro.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occurred
        file: &'static str,
        /// The source line in which this error occurred
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of bound read would have occurred!")]
    OutOfBounds,

    /// The input is a valid binary but not one this library processes.
    ///
    /// Raised for non-PE32 optional headers, non-i386 machine types, and
    /// for operations on native-compiled code that only P-Code supports.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The input is a PE file but carries no Visual Basic 5/6 metadata.
    ///
    /// Raised when the `VB5!` signature is absent from every section, or
    /// when the VB structure graph behind it cannot be followed.
    #[error("Not a VB5/6 file: {0}")]
    NotVisualBasic(String),

    /// The lifter popped an empty evaluation stack.
    ///
    /// The payload names the mnemonic that performed the pop. Only the
    /// current procedure is abandoned; the pipeline continues with the next.
    #[error("Evaluation stack underflow while lifting '{0}'")]
    StackUnderflow(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE container parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
