use thiserror::Error;

/// Why a call to the backend did not produce the expected result.
///
/// Every remote operation returns this instead of panicking or swallowing
/// the failure; the call site picks the fallback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, timeout, broken body stream.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backend answered, but not with the status this call expects.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    /// The body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Protocol(String),
    /// A row update was requested before any control row was seen.
    #[error("no control row id")]
    MissingRowId,
}
