use std::fmt;
use std::path::Path;

/// Failures while loading analyzer inputs (syntax trees, configuration).
///
/// The analysis itself never fails: missing or malformed information only
/// makes it more conservative.
#[derive(Debug)]
pub enum Error {
    Io {
        path: String,
        source: std::io::Error,
    },
    Format {
        path: String,
        msg: String,
    },
    UnsupportedFormat {
        path: String,
        extension: Option<String>,
    },
}

impl Error {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn format(path: &str, err: impl fmt::Display) -> Self {
        Error::Format {
            path: path.to_string(),
            msg: err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { path, source } => write!(f, "failed to read '{}': {}", path, source),
            Error::Format { path, msg } => write!(f, "malformed input '{}': {}", path, msg),
            Error::UnsupportedFormat { path, extension } => match extension {
                Some(ext) => write!(f, "unsupported file extension '.{}' for '{}'", ext, path),
                None => write!(f, "cannot infer format of '{}' without an extension", path),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
