/// A possible error value when parsing a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    /// Scheme is missing or not `http`/`https`.
    #[error("URI scheme not supported")]
    UnsupportedScheme,
    /// Authority is empty.
    #[error("URI missing host")]
    MissingHost,
    /// Port is not a decimal number in range.
    #[error("URI has invalid port")]
    InvalidPort,
    /// Invalid character found.
    #[error("URI contains invalid character")]
    Char,
}
