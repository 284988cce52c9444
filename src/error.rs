use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("document is not accessible: {0}")]
    InaccessibleDocument(String),

    #[error("document interaction failed: {0}")]
    DocumentInteraction(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("invalid document fixture: {0}")]
    Fixture(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
