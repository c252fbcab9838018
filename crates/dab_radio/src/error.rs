use thiserror::Error;

/// Fatal, propagated-up errors raised by this crate (spec §7). As in `dab_core`,
/// CRC/Firecode/RS failures are *not* represented here; they are routing decisions
/// handled locally.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
