use std::path::PathBuf;

use thiserror::Error;

/// Every failure mode of the conversion pipeline.
///
/// Configuration problems (bad arguments, malformed specs) are detected before
/// any model I/O. Nothing is silently swallowed: each variant carries the
/// locator, node or argument it refers to.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("source model not found: {}", .locator.display())]
    SourceNotFound { locator: PathBuf },

    #[error("saved model {} exposes several signatures ({}), select one with --signature-def",
            .path.display(), .candidates.join(", "))]
    AmbiguousSignature { path: PathBuf, candidates: Vec<String> },

    #[error("no signature named `{name}' in saved model {}", .path.display())]
    SignatureNotFound { path: PathBuf, name: String },

    #[error("malformed custom op token `{0}', expected `OpName' or `OpName:domain'")]
    MalformedCustomOp(String),

    #[error("invalid extra opset `{0}', expected `domain:version'")]
    InvalidExtensionSpec(String),

    #[error("{side} rename list has {got} entries for {expected} declared {side} tensors")]
    RenameCountMismatch { side: &'static str, expected: usize, got: usize },

    #[error("renames map both `{first}' and `{second}' to `{new_name}'")]
    RenameCollision { first: String, second: String, new_name: String },

    #[error("serialized model is {size} bytes, above the single-file ceiling of {limit} bytes. \
             Enable large-model mode to write an archive bundle instead")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("no conversion for operator `{op}' (node `{node}')")]
    Conversion { node: String, op: String },

    #[error("malformed source model: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protobuf decoding failed: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
