//! Terminal processing records written to the outcome sink.
//!
//! One document shape serves both append-only indices (`message-results` and
//! `message-exceptions`); writes are best-effort and never re-fail the
//! pipeline that produced them.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeResult {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub tenant_id: String,
    pub route_id: String,
    pub result: OutcomeResult,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: u64,
    pub worker_name: String,
}

impl OutcomeRecord {
    pub fn success(tenant_id: &str, attempts: u32, worker_name: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            route_id: crate::tenant_route_id(tenant_id),
            result: OutcomeResult::Success,
            attempts,
            error_kind: None,
            error_message: None,
            timestamp: crate::now_millis(),
            worker_name: worker_name.to_string(),
        }
    }

    pub fn failure(tenant_id: &str, attempts: u32, worker_name: &str, err: &crate::Error) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            route_id: crate::tenant_route_id(tenant_id),
            result: OutcomeResult::Failed,
            attempts,
            error_kind: Some(err.kind().to_string()),
            error_message: Some(err.to_string()),
            timestamp: crate::now_millis(),
            worker_name: worker_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_document_shape() {
        let record = OutcomeRecord::success("AMAZON", 1, "Partner-AMAZON-Worker-1");
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["tenantId"], "AMAZON");
        assert_eq!(json["routeId"], "Partner:AMAZON:Main");
        assert_eq!(json["result"], "SUCCESS");
        assert_eq!(json["workerName"], "Partner-AMAZON-Worker-1");
        assert!(json.get("errorKind").is_none());
    }

    #[test]
    fn failure_document_carries_error_fields() {
        let err = crate::Error::Transient("connect refused".into());
        let record = OutcomeRecord::failure("B", 3, "Partner-B-Worker-2", &err);
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["result"], "FAILED");
        assert_eq!(json["attempts"], 3);
        assert_eq!(json["errorKind"], "TRANSIENT");
    }
}
