use promfeed_exposition::ParseError;

use crate::subject::SubjectError;

/// Error types that can occur while configuring or running the scrape input.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid scrape configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("failed to parse exposition: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to decode protobuf exposition: {0}")]
    Decode(String),

    #[error("failed to publish event: {0}")]
    Publish(#[from] SubjectError),
}
