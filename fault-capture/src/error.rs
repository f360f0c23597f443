use std::fmt;

/// An error that can occur when attaching a [`crate::FaultHandler`]
#[derive(Debug)]
pub enum Error {
    /// For simplicity sake, only one [`crate::FaultHandler`] can be attached
    /// at any one time.
    HandlerAlreadyInstalled,
    /// An I/O or other syscall failed
    Io(std::io::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(inner) => Some(inner),
            Self::HandlerAlreadyInstalled => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlerAlreadyInstalled => f.write_str("a fault handler is already attached"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
