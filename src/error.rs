// ============================================================================
// Error Handling
// ============================================================================

use actix_web::http::StatusCode;
use thiserror::Error;

pub const MISSING_TRAIN_ID_MESSAGE: &str = "No train ID provided";
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// Failures while fetching or decoding the real-time feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Failed to fetch train feed: {0}")]
    Network(String),

    #[error("Train feed responded with status {0}")]
    Status(u16),

    #[error("Failed to decode train feed: {0}")]
    Decode(String),
}

/// Failures while loading the static GTFS reference (stations, lines, colors).
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("Failed to download GTFS archive: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GTFS archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("GTFS CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Reference cache error: {0}")]
    Cache(#[from] serde_json::Error),
}

/// Terminal outcome of a failed train resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("{}", MISSING_TRAIN_ID_MESSAGE)]
    MissingTrainId,

    #[error("{0}")]
    Acquisition(String),

    #[error("Train {0} not found")]
    TrainNotFound(String),

    #[error("{}", UNKNOWN_ERROR_MESSAGE)]
    Unknown,
}

impl TrackerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TrackerError::MissingTrainId => StatusCode::BAD_REQUEST,
            TrackerError::Acquisition(_) => StatusCode::BAD_GATEWAY,
            TrackerError::TrainNotFound(_) => StatusCode::NOT_FOUND,
            TrackerError::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FeedError> for TrackerError {
    fn from(err: FeedError) -> Self {
        match &err {
            FeedError::Network(detail) | FeedError::Decode(detail) if detail.trim().is_empty() => {
                TrackerError::Unknown
            }
            _ => TrackerError::Acquisition(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_consumer_contract() {
        assert_eq!(TrackerError::MissingTrainId.to_string(), "No train ID provided");
        assert_eq!(
            TrackerError::TrainNotFound("T42".to_string()).to_string(),
            "Train T42 not found"
        );
        assert_eq!(TrackerError::Unknown.to_string(), "An unknown error occurred");
    }

    #[test]
    fn feed_errors_keep_their_message() {
        let err: TrackerError = FeedError::Status(503).into();
        assert_eq!(
            err,
            TrackerError::Acquisition("Train feed responded with status 503".to_string())
        );
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn feed_errors_without_detail_become_unknown() {
        assert_eq!(TrackerError::from(FeedError::Network(String::new())), TrackerError::Unknown);
        assert_eq!(TrackerError::from(FeedError::Decode("  ".to_string())), TrackerError::Unknown);
        assert_eq!(
            TrackerError::from(FeedError::Decode("truncated".to_string())),
            TrackerError::Acquisition("Failed to decode train feed: truncated".to_string())
        );
    }
}
