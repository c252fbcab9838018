use thiserror::Error;

/// Fatal, propagated-up errors (spec §7: "Fatal (propagated up)"). CRC/Firecode/RS
/// failures are deliberately *not* represented here — they are ordinary routing
/// decisions handled locally as `Option`/`bool`, never as `Err`.
#[derive(Debug, Error)]
pub enum DabError {
    #[error("sample source reported a permanent read error: {0}")]
    SampleSourceFailed(String),

    #[error("sample source reached end of stream")]
    ReaderStopped,

    #[error("internal invariant violated: {0}")]
    InvariantViolation(&'static str),
}

pub type DabResult<T> = Result<T, DabError>;
