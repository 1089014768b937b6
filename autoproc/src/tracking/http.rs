//! JSON-over-HTTP tracking service client.

use super::{FailureRecord, StatusEvent, TrackingHandle, TrackingRequest, TrackingService};
use crate::config::PipelineConfig;
use crate::errors::TrackingError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Posts tracking calls as JSON to a REST endpoint.
///
/// Routes, relative to the base URL:
/// - `POST integrations` opens an attempt and answers
///   `{"integration_id": .., "program_id": ..}`
/// - `POST integrations/{id}/status` records a transition
/// - `POST integrations/{id}/failed` marks the attempt failed
#[derive(Debug, Clone)]
pub struct HttpTrackingService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTrackingService {
    /// Creates a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::Unavailable`] if the HTTP client cannot be
    /// built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Creates a client from the configured URL, or `None` when tracking is
    /// not configured.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::Unavailable`] if the HTTP client cannot be
    /// built.
    pub fn from_config(config: &PipelineConfig) -> Result<Option<Self>, TrackingError> {
        config
            .tracking_url
            .as_deref()
            .map(|url| Self::new(url, config.tracking_timeout()))
            .transpose()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<serde_json::Value, TrackingError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| TrackingError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TrackingError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TrackingError::InvalidResponse(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TrackingError::InvalidResponse(e.to_string()))
    }
}

/// Reads the identifiers out of a begin response; ids may be numbers or strings.
pub(crate) fn parse_begin_response(
    request: &TrackingRequest,
    body: &serde_json::Value,
) -> Result<TrackingHandle, TrackingError> {
    fn id_of(value: Option<&serde_json::Value>) -> Option<String> {
        match value? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    let integration_id = id_of(body.get("integration_id"))
        .ok_or_else(|| TrackingError::InvalidResponse(format!("no integration_id in {body}")))?;
    let handle = TrackingHandle::new(request.branch(), integration_id);
    Ok(match id_of(body.get("program_id")) {
        Some(program_id) => handle.with_program_id(program_id),
        None => handle,
    })
}

#[derive(Serialize)]
struct StatusBody<'a> {
    program_id: Option<&'a str>,
    #[serde(flatten)]
    event: &'a StatusEvent,
}

#[derive(Serialize)]
struct FailedBody<'a> {
    program_id: Option<&'a str>,
    anomalous: bool,
    #[serde(flatten)]
    record: &'a FailureRecord,
}

#[async_trait]
impl TrackingService for HttpTrackingService {
    async fn begin_tracking(&self, request: &TrackingRequest) -> Result<TrackingHandle, TrackingError> {
        let body = self.post("integrations", request).await?;
        parse_begin_response(request, &body)
    }

    async fn report_status(&self, handle: &TrackingHandle, event: &StatusEvent) -> Result<(), TrackingError> {
        let body = StatusBody {
            program_id: handle.program_id.as_deref(),
            event,
        };
        self.post(&format!("integrations/{}/status", handle.integration_id), &body)
            .await
            .map(|_| ())
    }

    async fn mark_failed(&self, handle: &TrackingHandle, record: &FailureRecord) -> Result<(), TrackingError> {
        let body = FailedBody {
            program_id: handle.program_id.as_deref(),
            anomalous: handle.branch.is_anomalous(),
            record,
        };
        self.post(&format!("integrations/{}/failed", handle.integration_id), &body)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Branch, TrackingStatus};
    use chrono::Utc;

    fn request() -> TrackingRequest {
        TrackingRequest {
            dataset_id: "9".to_string(),
            command_line: String::new(),
            program_name: "autoproc".to_string(),
            anomalous: true,
            start_time: Utc::now(),
            comment: String::new(),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let service = HttpTrackingService::new("http://tracker.local/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(service.url("integrations"), "http://tracker.local/api/integrations");
    }

    #[test]
    fn test_from_config_without_url_is_none() {
        let config = PipelineConfig::default();
        assert!(HttpTrackingService::from_config(&config).unwrap().is_none());

        let config = config.with_tracking_url("http://tracker.local/api");
        let service = HttpTrackingService::from_config(&config).unwrap().unwrap();
        assert_eq!(service.url("integrations"), "http://tracker.local/api/integrations");
    }

    #[test]
    fn test_parse_numeric_ids() {
        let body = serde_json::json!({"integration_id": 1501, "program_id": 88});
        let handle = parse_begin_response(&request(), &body).unwrap();

        assert_eq!(handle.integration_id, "1501");
        assert_eq!(handle.program_id.as_deref(), Some("88"));
        assert_eq!(handle.branch, Branch::Anomalous);
    }

    #[test]
    fn test_parse_missing_id_is_invalid() {
        let body = serde_json::json!({"program_id": 88});
        assert!(matches!(
            parse_begin_response(&request(), &body),
            Err(TrackingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_status_body_is_flat() {
        let event = StatusEvent::now("Indexing", TrackingStatus::Launched, "XDS started");
        let body = serde_json::to_value(StatusBody {
            program_id: Some("88"),
            event: &event,
        })
        .unwrap();

        assert_eq!(body["program_id"], "88");
        assert_eq!(body["stage"], "Indexing");
        assert_eq!(body["status"], "Launched");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let service = HttpTrackingService::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let result = service.begin_tracking(&request()).await;
        assert!(matches!(result, Err(TrackingError::Unavailable(_))));
    }
}
