use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of one pipeline stage. Every stage aborts the run on its first error.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("transfer from {url} failed: {message}")]
    Transfer {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to write store {}: {message}", store.display())]
    Storage { store: PathBuf, message: String },

    #[error("failed to export {}: {message}", path.display())]
    Export { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EtlError {
    pub fn stage(&self) -> &'static str {
        match self {
            EtlError::Transfer { .. } => "fetch",
            EtlError::Parse { .. } => "load",
            EtlError::Storage { .. } => "persist",
            EtlError::Export { .. } => "export",
            EtlError::Config(_) => "config",
        }
    }

    pub(crate) fn parse(path: &Path, message: impl ToString) -> Self {
        EtlError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn storage(store: &Path, message: impl ToString) -> Self {
        EtlError::Storage {
            store: store.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn export(path: &Path, message: impl ToString) -> Self {
        EtlError::Export {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_match_pipeline_steps() {
        let err = EtlError::Transfer {
            url: "http://localhost/x".to_string(),
            status: Some(404),
            message: "HTTP 404 Not Found".to_string(),
        };
        assert_eq!(err.stage(), "fetch");
        assert!(err.to_string().contains("http://localhost/x"));

        let err = EtlError::storage(Path::new("data/database1.db"), "disk full");
        assert_eq!(err.stage(), "persist");
        assert_eq!(
            err.to_string(),
            "failed to write store data/database1.db: disk full"
        );
    }
}
