use thiserror::Error;

/// Input errors raised at the writer boundary.
///
/// These travel inside `anyhow::Error`; callers that care can
/// `downcast_ref::<MemoryError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory entry key must not be empty")]
    EmptyKey,
    #[error("memory entry key `{key}` must be a single line")]
    MultilineKey { key: String },
    #[error("memory entry `{key}` has empty content")]
    EmptyContent { key: String },
    #[error("unknown purge scope `{0}` (expected profile, fact, episode or all)")]
    UnknownScope(String),
    #[error("unknown memory type `{0}` (expected profile, fact or episode)")]
    UnknownMemoryType(String),
}
