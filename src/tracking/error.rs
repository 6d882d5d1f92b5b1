use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("No active tracking run")]
    NoActiveRun,
    #[error("filename is required when logging bytes or stream data")]
    MissingFilename,
    #[error("Invalid artifact filename: {0}")]
    InvalidFilename(String),
    #[error("Unsupported artifact payload: {0}")]
    UnsupportedPayload(String),
    #[error("Tracking is enabled but no tracking URI is configured (set MLFLOW_TRACKING_URI or disable tracking)")]
    MissingTrackingUri,
    #[error("Unsupported tracking URI: {0}")]
    UnsupportedTrackingUri(String),
    #[error("Unsupported artifact store: {0}")]
    UnsupportedArtifactStore(String),
    #[error("Tracking server returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected tracking response: {0}")]
    Response(String),
    #[error("Tracking backend error: {0}")]
    Backend(String),
    #[error("Failed to walk artifact directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
