//! In-process stand-in for the remote light/telemetry service.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lightnode_common::{LightPayload, TempAck, TempReport, HEADER_API_KEY, PATH_LIGHT, PATH_TEMP};

#[derive(Clone)]
pub struct MockService {
    api_key: Arc<str>,
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockState {
    pub light: bool,
    pub last_temp_c: Option<f32>,
    pub reports: u64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl MockService {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: Arc::from(api_key),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> MockState {
        self.state.lock().await.clone()
    }

    #[cfg(test)]
    pub async fn set_light(&self, light: bool) {
        self.state.lock().await.light = light;
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(PATH_LIGHT, get(handle_get_light).put(handle_put_light))
            .route(PATH_TEMP, put(handle_put_temp))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let presented = headers
            .get(HEADER_API_KEY)
            .and_then(|value| value.to_str().ok());
        match presented {
            Some(key) if key == &*self.api_key => Ok(()),
            Some(_) => Err(error_response(StatusCode::UNAUTHORIZED, "Invalid api-key")),
            None => Err(error_response(
                StatusCode::UNAUTHORIZED,
                "Missing api-key header",
            )),
        }
    }
}

async fn handle_get_light(State(service): State<MockService>, headers: HeaderMap) -> Response {
    if let Err(response) = service.authorize(&headers) {
        return response;
    }

    let light = service.state.lock().await.light;
    Json(LightPayload { light }).into_response()
}

async fn handle_put_light(
    State(service): State<MockService>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = service.authorize(&headers) {
        return response;
    }

    let Ok(payload) = serde_json::from_slice::<LightPayload>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Expected {\"light\": bool}");
    };

    service.state.lock().await.light = payload.light;
    info!("mock light set to {}", payload.light);
    Json(payload).into_response()
}

async fn handle_put_temp(
    State(service): State<MockService>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = service.authorize(&headers) {
        return response;
    }

    let report = match serde_json::from_slice::<TempReport>(&body) {
        Ok(report) if report.temp.is_finite() => report,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "Temperature must be finite"),
        Err(err) => {
            warn!("rejecting temperature report: {err}");
            return error_response(StatusCode::BAD_REQUEST, "Expected {\"temp\": number}");
        }
    };

    let (previous, reports) = {
        let mut state = service.state.lock().await;
        let previous = state.last_temp_c.replace(report.temp);
        state.reports = state.reports.saturating_add(1);
        (previous, state.reports)
    };

    match previous {
        Some(previous) => info!(
            "mock received temperature {:.2}C (was {previous:.2}C, report #{reports})",
            report.temp
        ),
        None => info!("mock received first temperature {:.2}C", report.temp),
    }
    Json(TempAck {
        message: "ok".to_string(),
    })
    .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use super::*;

    async fn call(
        service: &MockService,
        method: Method,
        path: &str,
        key: Option<&str>,
        body: &str,
    ) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = key {
            builder = builder.header(HEADER_API_KEY, key);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        let response = service.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 4096).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn rejects_missing_api_key() {
        let service = MockService::new("k");
        let (status, body) = call(&service, Method::GET, PATH_LIGHT, None, "").await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("api-key"));
    }

    #[tokio::test]
    async fn rejects_wrong_api_key() {
        let service = MockService::new("k");
        let (status, _) = call(&service, Method::GET, PATH_LIGHT, Some("nope"), "").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn serves_current_light_state() {
        let service = MockService::new("k");
        service.set_light(true).await;

        let (status, body) = call(&service, Method::GET, PATH_LIGHT, Some("k"), "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"light":true}"#);
    }

    #[tokio::test]
    async fn put_light_updates_state() {
        let service = MockService::new("k");
        let (status, _) = call(
            &service,
            Method::PUT,
            PATH_LIGHT,
            Some("k"),
            r#"{"light": true}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(service.snapshot().await.light);
    }

    #[tokio::test]
    async fn stores_temperature_and_acknowledges() {
        let service = MockService::new("k");
        let (status, body) = call(
            &service,
            Method::PUT,
            PATH_TEMP,
            Some("k"),
            r#"{"temp": 23.5}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"message":"ok"}"#);
        let state = service.snapshot().await;
        assert_eq!(state.last_temp_c, Some(23.5));
        assert_eq!(state.reports, 1);
    }

    #[tokio::test]
    async fn rejects_malformed_temperature() {
        let service = MockService::new("k");
        let (status, _) = call(&service, Method::PUT, PATH_TEMP, Some("k"), "{temp: 1}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(service.snapshot().await.reports, 0);
    }
}
