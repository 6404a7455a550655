use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Still unauthorized after the one permitted refresh, or no session to refresh.
    #[error("unauthorized")]
    Unauthorized,

    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}
