use std::path::PathBuf;

use thiserror::Error;

/// Filesystem error that remembers which path it happened at.
///
/// `PermissionDenied` and `PathNotFound` are split out because the command
/// boundary reports them as distinct kinds.
#[derive(Debug, Error, Clone)]
pub enum IoError {
    #[error("input/output error at {path:?}:\n{error}")]
    Io { error: String, path: PathBuf },
    #[error("permission denied at {path:?}")]
    PermissionDenied { path: PathBuf },
    #[error("path not found: {path:?}")]
    PathNotFound { path: PathBuf },
}

impl IoError {
    pub fn new(error: &std::io::Error, path: PathBuf) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::PathNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io {
                error: error.to_string(),
                path,
            },
        }
    }
}

pub trait IntoIoError<T> {
    /// Attaches a path to a `std::io` result, converting it to [`IoError`].
    fn path(self, path: impl Into<PathBuf>) -> Result<T, IoError>;
}

impl<T> IntoIoError<T> for Result<T, std::io::Error> {
    fn path(self, path: impl Into<PathBuf>) -> Result<T, IoError> {
        self.map_err(|err| IoError::new(&err, path.into()))
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request returned status {code}\nurl: {url}")]
    DownloadError { code: reqwest::StatusCode, url: String },
    #[error("network request failed:\n{0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("request timed out\nurl: {url}")]
    Timeout { url: String },
}

/// JSON that didn't parse. Carries a sample of the offending text because
/// "expected value at line 1 column 1" on its own helps nobody.
#[derive(Debug, Error, Clone)]
#[error("couldn't parse JSON:\n{error}\ntext: {sample}")]
pub struct JsonError {
    pub error: String,
    pub sample: String,
}

impl JsonError {
    const SAMPLE_LEN: usize = 120;

    pub fn new(error: &serde_json::Error, text: &str) -> Self {
        let sample = if text.len() > Self::SAMPLE_LEN {
            let mut end = Self::SAMPLE_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &text[..end])
        } else {
            text.to_owned()
        };
        Self {
            error: error.to_string(),
            sample,
        }
    }
}

pub trait IntoJsonError<T> {
    /// Attaches the offending text to a serde result, converting it to
    /// [`JsonError`].
    fn json(self, text: String) -> Result<T, JsonError>;
}

impl<T> IntoJsonError<T> for Result<T, serde_json::Error> {
    fn json(self, text: String) -> Result<T, JsonError> {
        self.map_err(|err| JsonError::new(&err, &text))
    }
}

#[derive(Debug, Error)]
pub enum JsonFileError {
    #[error("{0}")]
    SerdeError(#[from] JsonError),
    #[error("{0}")]
    Io(#[from] IoError),
}

#[derive(Debug, Error)]
pub enum JsonDownloadError {
    #[error("{0}")]
    SerdeError(#[from] JsonError),
    #[error("{0}")]
    Request(#[from] RequestError),
}

pub trait IntoStringError<T> {
    fn strerr(self) -> Result<T, String>;
}

impl<T, E: std::fmt::Display> IntoStringError<T> for Result<T, E> {
    fn strerr(self) -> Result<T, String> {
        self.map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_classification() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = IoError::new(&not_found, PathBuf::from("/a/b"));
        assert!(matches!(err, IoError::PathNotFound { .. }));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        let err = IoError::new(&denied, PathBuf::from("/a/b"));
        assert!(matches!(err, IoError::PermissionDenied { .. }));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = IoError::new(&other, PathBuf::from("/a/b"));
        assert!(matches!(err, IoError::Io { .. }));
    }

    #[test]
    fn json_error_truncates_sample() {
        let text = "x".repeat(500);
        let parse_err = serde_json::from_str::<serde_json::Value>(&text).unwrap_err();
        let err = JsonError::new(&parse_err, &text);
        assert!(err.sample.len() < 130);
        assert!(err.sample.ends_with("..."));
    }
}
