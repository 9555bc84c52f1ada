//! Error kinds per spec 7. `MissingEndpoint` and `DisabledStage` are not
//! represented here — they are handled locally (a dropped link, a skipped
//! node) and reported through `log::warn!` at the call site instead of
//! propagating out of the loader.

use crate::param::GraphType;

#[derive(thiserror::Error, Debug, Clone)]
pub enum CompileError {
    #[error("failed to parse fragment file {file}: {message}")]
    FragmentParse { file: String, message: String },

    #[error("failed to parse graph file {file}: {message}")]
    GraphParse { file: String, message: String },

    #[error(
        "dynamic parameter '{name}' type mismatch: table says {table_type:?}, fragment says {fragment_type:?}"
    )]
    RegistryMismatch { name: String, table_type: GraphType, fragment_type: GraphType },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;
