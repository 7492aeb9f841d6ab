/// Pool error.
///
/// Covers failures to acquire a connection, to open a consumer channel and protocol-level
/// errors reported on close-signals or on the delivery stream.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] anyhow::Error);

impl From<lapin::Error> for Error {
    fn from(err: lapin::Error) -> Self {
        Self(err.into())
    }
}

impl Error {
    /// Build an error from a plain message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(message))
    }
}
