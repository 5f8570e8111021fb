use derive_more as dm;

/// Errors surfaced by the engine.
///
/// All of them are recoverable: an operation that fails leaves the context in
/// the state it had before the call.
#[derive(Debug, dm::Display, dm::Error)]
pub enum Error {
    /// The context is not ready for the requested operation (e.g., no
    /// architecture is set or a register does not exist in it).
    #[display("configuration error: {message}")]
    Configuration { message: String },
    #[display("failed to load configurations: {source}")]
    Config { source: ::config::ConfigError },
    #[display("cannot decode instruction at {address:#x}: {reason}")]
    Decode {
        address: u64,
        reason: String,
    },
    #[display("unsupported instruction: {mnemonic}")]
    UnsupportedInstruction { mnemonic: String },
    /// Width mismatches, out of range values, and invalid bit slices.
    #[display("range error: {message}")]
    Range { message: String },
    #[display("arithmetic error: {message}")]
    Arithmetic { message: String },
    #[display("read from unmapped memory at {address:#x}")]
    UnmappedMemory { address: u64 },
    #[display("a symbolic variable named `{name}` already exists")]
    NameConflict { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        Self::Range {
            message: message.into(),
        }
    }

    pub(crate) fn arithmetic(message: impl Into<String>) -> Self {
        Self::Arithmetic {
            message: message.into(),
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(source: ::config::ConfigError) -> Self {
        Self::Config { source }
    }
}
