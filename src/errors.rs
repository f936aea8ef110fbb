//! Crate-wide error type.
//!
//! Only genuinely fatal conditions are represented here: everything the
//! transaction engine can recover from locally (unexpected status words,
//! malformed TLV, an unreadable record) is recorded into the session
//! record or a [`crate::ber::ParseResult`] instead of being raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("card lost during scan")]
    CardLost,

    #[error("scan cancelled")]
    Cancelled,

    #[error("no transport available")]
    NoTransport,

    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
