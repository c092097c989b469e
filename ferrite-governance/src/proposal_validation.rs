//! Payload validation for proposals and records.
//!
//! The maintenance loop runs live proposals and unlocked records through
//! this validator; anything that fails (expired window, malformed data)
//! gets flagged for deletion.

use serde_json::Value;

use ferrite_shared_types::governance::{GovernanceObject, ObjectType};

/// Validation errors for governance object payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalValidationError {
    /// Payload is not a JSON object.
    MalformedPayload,
    /// Required fields are missing for the object type.
    MissingRequiredFields,
    /// Name is empty, too long, or contains invalid characters.
    InvalidName,
    /// Payment window is malformed or has already closed.
    InvalidWindow,
    /// Payment amount is missing or non-positive.
    InvalidAmount,
    /// Record content identifier fails the strict shape check.
    InvalidContentId,
}

/// Configuration for payload validation.
#[derive(Debug, Clone)]
pub struct ProposalValidationConfig {
    pub max_name_length: usize,
    pub max_url_length: usize,
}

impl Default for ProposalValidationConfig {
    fn default() -> Self {
        Self {
            max_name_length: 40,
            max_url_length: 255,
        }
    }
}

/// Validates proposal and record payloads.
pub struct ProposalValidator {
    config: ProposalValidationConfig,
}

impl Default for ProposalValidator {
    fn default() -> Self {
        ProposalValidator::new(ProposalValidationConfig::default())
    }
}

impl ProposalValidator {
    pub fn new(config: ProposalValidationConfig) -> Self {
        Self { config }
    }

    /// Validate an object's payload at `now` (seconds).
    pub fn validate(
        &self,
        object: &GovernanceObject,
        now: i64,
    ) -> Result<(), ProposalValidationError> {
        let json: Value = object
            .json()
            .map_err(|_| ProposalValidationError::MalformedPayload)?;
        let map = json
            .as_object()
            .ok_or(ProposalValidationError::MalformedPayload)?;

        self.validate_name(map.get("name"))?;

        match object.object_type {
            ObjectType::Proposal => {
                self.validate_window(map.get("start_epoch"), map.get("end_epoch"), now)?;
                self.validate_amount(map.get("payment_amount"))?;
                if let Some(url) = map.get("url").and_then(Value::as_str) {
                    if url.len() > self.config.max_url_length {
                        return Err(ProposalValidationError::InvalidName);
                    }
                }
            }
            ObjectType::Record => {
                let cid = map
                    .get("ipfscid")
                    .and_then(Value::as_str)
                    .ok_or(ProposalValidationError::MissingRequiredFields)?;
                if !crate::content_pinning::valid_content_id(cid) {
                    return Err(ProposalValidationError::InvalidContentId);
                }
            }
            ObjectType::Trigger | ObjectType::Other => {}
        }

        Ok(())
    }

    fn validate_name(&self, name: Option<&Value>) -> Result<(), ProposalValidationError> {
        let name = name
            .and_then(Value::as_str)
            .ok_or(ProposalValidationError::MissingRequiredFields)?;
        if name.is_empty() || name.len() > self.config.max_name_length {
            return Err(ProposalValidationError::InvalidName);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProposalValidationError::InvalidName);
        }
        Ok(())
    }

    fn validate_window(
        &self,
        start: Option<&Value>,
        end: Option<&Value>,
        now: i64,
    ) -> Result<(), ProposalValidationError> {
        let start = start
            .and_then(Value::as_i64)
            .ok_or(ProposalValidationError::MissingRequiredFields)?;
        let end = end
            .and_then(Value::as_i64)
            .ok_or(ProposalValidationError::MissingRequiredFields)?;
        if start <= 0 || end <= start {
            return Err(ProposalValidationError::InvalidWindow);
        }
        // A proposal whose payment window already closed is dead weight.
        if end < now {
            return Err(ProposalValidationError::InvalidWindow);
        }
        Ok(())
    }

    fn validate_amount(&self, amount: Option<&Value>) -> Result<(), ProposalValidationError> {
        let amount = amount
            .and_then(Value::as_f64)
            .ok_or(ProposalValidationError::MissingRequiredFields)?;
        if amount <= 0.0 {
            return Err(ProposalValidationError::InvalidAmount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_shared_types::OutPoint;

    fn object_with_data(object_type: ObjectType, data: &str) -> GovernanceObject {
        GovernanceObject {
            object_type,
            data: data.as_bytes().to_vec(),
            masternode_outpoint: OutPoint::new([1u8; 32], 0),
            collateral_hash: [2u8; 32],
            creation_time: 1_700_000_000,
            signature: [0u8; 64],
        }
    }

    #[test]
    fn test_valid_proposal_passes() {
        let validator = ProposalValidator::default();
        let obj = object_with_data(
            ObjectType::Proposal,
            r#"{"name":"fund-dev","start_epoch":1000,"end_epoch":2000,"payment_amount":12.5}"#,
        );
        assert!(validator.validate(&obj, 1500).is_ok());
    }

    #[test]
    fn test_expired_window_rejected() {
        let validator = ProposalValidator::default();
        let obj = object_with_data(
            ObjectType::Proposal,
            r#"{"name":"old","start_epoch":1000,"end_epoch":2000,"payment_amount":1.0}"#,
        );
        assert_eq!(
            validator.validate(&obj, 3000),
            Err(ProposalValidationError::InvalidWindow)
        );
    }

    #[test]
    fn test_bad_name_rejected() {
        let validator = ProposalValidator::default();
        let obj = object_with_data(
            ObjectType::Proposal,
            r#"{"name":"has spaces!","start_epoch":1,"end_epoch":2,"payment_amount":1.0}"#,
        );
        assert_eq!(
            validator.validate(&obj, 0),
            Err(ProposalValidationError::InvalidName)
        );
    }

    #[test]
    fn test_record_requires_strict_cid() {
        let validator = ProposalValidator::default();
        let good = object_with_data(
            ObjectType::Record,
            r#"{"name":"rec1","ipfscid":"QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"}"#,
        );
        assert!(validator.validate(&good, 0).is_ok());

        let bad = object_with_data(ObjectType::Record, r#"{"name":"rec1","ipfscid":"short"}"#);
        assert_eq!(
            validator.validate(&bad, 0),
            Err(ProposalValidationError::InvalidContentId)
        );
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let validator = ProposalValidator::default();
        let obj = object_with_data(ObjectType::Proposal, "not json");
        assert_eq!(
            validator.validate(&obj, 0),
            Err(ProposalValidationError::MalformedPayload)
        );
    }
}
