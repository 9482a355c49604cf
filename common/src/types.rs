use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl From<bool> for ConnectionStatus {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

/// Phases of the node's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Connecting,
    Polling,
    Reconnecting,
    Halted,
}

impl NodePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Polling => "POLLING",
            Self::Reconnecting => "RECONNECTING",
            Self::Halted => "HALTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Status code plus raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Body of `GET /api/light` (and `PUT /api/light` on the mock service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightPayload {
    pub light: bool,
}

/// Body of `PUT /api/temp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempReport {
    pub temp: f32,
}

/// Acknowledgment returned by `PUT /api/temp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempAck {
    pub message: String,
}

/// Result of one successful telemetry exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub temp_c: f32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn temp_report_serializes_as_number() {
        let body = serde_json::to_string(&TempReport { temp: 23.5 }).unwrap();
        assert_eq!(body, r#"{"temp":23.5}"#);
    }

    #[test]
    fn light_payload_requires_boolean() {
        assert!(serde_json::from_str::<LightPayload>(r#"{"light": true}"#).unwrap().light);
        assert!(serde_json::from_str::<LightPayload>(r#"{"light": "yes"}"#).is_err());
        assert!(serde_json::from_str::<LightPayload>(r#"{}"#).is_err());
    }

    #[test]
    fn connection_status_from_flag() {
        assert_eq!(ConnectionStatus::from(true), ConnectionStatus::Connected);
        assert!(!ConnectionStatus::from(false).is_connected());
    }
}
