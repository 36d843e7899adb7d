use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("wire frame truncated: expected at least {expected} bytes, got {got}")]
    FrameTruncated { expected: usize, got: usize },

    #[error("unknown wire message tag: {0}")]
    UnknownTag(u8),

    #[error("declared payload length {declared} does not match remaining {remaining} bytes")]
    LengthMismatch { declared: usize, remaining: usize },

    #[error("malformed field: {0}")]
    Malformed(&'static str),
}
