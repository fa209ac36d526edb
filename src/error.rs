use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("OAuth2 error during {operation}: {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token error: {0}")]
    Token(String),
    #[error("Root CA not found: {}", .0.display())]
    CaNotFound(PathBuf),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
