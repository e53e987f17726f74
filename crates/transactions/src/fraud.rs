//! Fraud-check wire types.

use common::TransactionReference;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, TransactionError};

/// Decision reported by the fraud-detection service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudDecision {
    #[serde(alias = "approved")]
    Approved,
    #[serde(alias = "rejected")]
    Rejected,
    #[serde(alias = "review")]
    Review,
}

impl FraudDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudDecision::Approved => "APPROVED",
            FraudDecision::Rejected => "REJECTED",
            FraudDecision::Review => "REVIEW",
        }
    }
}

impl std::fmt::Display for FraudDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message consumed from the fraud-result topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudCheckResult {
    pub transaction_reference: TransactionReference,
    pub fraud_score: f64,
    pub fraud_status: FraudDecision,
}

impl FraudCheckResult {
    pub fn new(
        reference: impl Into<TransactionReference>,
        fraud_score: f64,
        fraud_status: FraudDecision,
    ) -> Self {
        Self {
            transaction_reference: reference.into(),
            fraud_score,
            fraud_status,
        }
    }

    /// Decodes a result sent either bare or wrapped in an event envelope's
    /// `payload` field.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| TransactionError::Decode(e.to_string()))?;

        let body = match value.get("payload") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };

        serde_json::from_value(body).map_err(|e| TransactionError::Decode(e.to_string()))
    }
}

/// Signals forwarded to the fraud-detection service with a check request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_result() {
        let bytes = br#"{"transactionReference":"TXN-100","fraudScore":12.5,"fraudStatus":"APPROVED"}"#;
        let result = FraudCheckResult::decode(bytes).unwrap();

        assert_eq!(result.transaction_reference.as_str(), "TXN-100");
        assert_eq!(result.fraud_score, 12.5);
        assert_eq!(result.fraud_status, FraudDecision::Approved);
    }

    #[test]
    fn decodes_enveloped_result() {
        let bytes = br#"{
            "eventType": "fraud.check-completed",
            "aggregateId": "TXN-100",
            "timestamp": "2026-01-01T00:00:00Z",
            "payload": {"transactionReference":"TXN-100","fraudScore":91,"fraudStatus":"rejected"}
        }"#;
        let result = FraudCheckResult::decode(bytes).unwrap();

        assert_eq!(result.fraud_status, FraudDecision::Rejected);
        assert_eq!(result.fraud_score, 91.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            FraudCheckResult::decode(b"not json"),
            Err(TransactionError::Decode(_))
        ));
        assert!(matches!(
            FraudCheckResult::decode(br#"{"fraudStatus":"MAYBE"}"#),
            Err(TransactionError::Decode(_))
        ));
    }

    #[test]
    fn empty_risk_context_serializes_to_empty_object() {
        let json = serde_json::to_string(&RiskContext::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
