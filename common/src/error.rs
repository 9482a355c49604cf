use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    #[error("wifi join timed out after {attempts} attempts")]
    WifiJoinTimeout { attempts: u32 },
    #[error("wifi connection lost")]
    WifiDropped,
    #[error("wifi driver error: {0}")]
    WifiDriver(String),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("json parse failure ({category}): {detail}")]
    Json {
        category: &'static str,
        detail: String,
    },
    #[error("temperature sensor read failed: {0}")]
    Sensor(String),
    #[error("display write failed: {0}")]
    Display(String),
    #[error("output pin write failed: {0}")]
    Pin(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NodeError {
    /// Only the startup join failure halts the node.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WifiJoinTimeout { .. })
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        let category = match err.classify() {
            Category::Io => "IoError",
            Category::Syntax => "InvalidInput",
            Category::Data => "InvalidData",
            Category::Eof => "IncompleteInput",
        };
        Self::Json {
            category,
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::LightPayload;

    #[test]
    fn classifies_unquoted_key_as_invalid_input() {
        let err: NodeError = serde_json::from_str::<LightPayload>("{light: true}")
            .unwrap_err()
            .into();
        match err {
            NodeError::Json { category, .. } => assert_eq!(category, "InvalidInput"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn classifies_truncated_body_as_incomplete() {
        let err: NodeError = serde_json::from_str::<LightPayload>(r#"{"light": tr"#)
            .unwrap_err()
            .into();
        assert!(matches!(
            err,
            NodeError::Json {
                category: "IncompleteInput" | "InvalidInput",
                ..
            }
        ));
    }

    #[test]
    fn only_join_timeout_is_fatal() {
        assert!(NodeError::WifiJoinTimeout { attempts: 20 }.is_fatal());
        assert!(!NodeError::WifiDropped.is_fatal());
        assert!(!NodeError::HttpStatus(404).is_fatal());
    }
}
