use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopsError {
    /// The API answered with a status >= 400.
    #[error("api request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LoopsError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn has_status(&self, expected: StatusCode) -> bool {
        self.status() == Some(expected.as_u16())
    }

    pub fn is_bad_request(&self) -> bool {
        self.has_status(StatusCode::BAD_REQUEST)
    }

    pub fn is_not_found(&self) -> bool {
        self.has_status(StatusCode::NOT_FOUND)
    }

    pub fn is_conflict(&self) -> bool {
        self.has_status(StatusCode::CONFLICT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> LoopsError {
        LoopsError::Api {
            status,
            body: "{}".into(),
        }
    }

    #[test]
    fn status_predicates() {
        assert!(api(400).is_bad_request());
        assert!(api(404).is_not_found());
        assert!(api(409).is_conflict());
        assert!(!api(500).is_bad_request());
        assert!(!LoopsError::Decode("eof".into()).is_not_found());
    }

    #[test]
    fn display_includes_status_and_body() {
        assert_eq!(
            api(400).to_string(),
            "api request failed with status 400: {}"
        );
    }
}
