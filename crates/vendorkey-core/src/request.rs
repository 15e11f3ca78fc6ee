//! Requests submitted to the authorization backend and the signing flow

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;

use crate::crypto::PublicPoint;
use crate::error::{Error, Result};
use crate::types::{AuthorizationProof, VvkId};

/// Action tag for verifying-key creation
pub const ACTION_NEW: &str = "NEW";

/// Subject type shared by every vendor sign request
pub const SUBJECT_SINGLE_PUBLIC_KEY: &str = "SinglePublicKey:1";

/// Action for re-signing vendor settings
pub const ACTION_UPDATE_SETTINGS: &str = "TidecloakUpdateSettings";

/// Version of every vendor sign request action
pub const ACTION_VERSION: &str = "1";

/// Capabilities authorized once when a verifying key is first created
pub const INIT_CAPABILITIES: [&str; 2] = ["TidecloakInit", "AccessTokenInit"];

/// Capability tags in `name:version` form, as the key-generation flow expects
pub fn capability_tags() -> Vec<String> {
    INIT_CAPABILITIES
        .iter()
        .map(|name| format!("{}:{}", name, ACTION_VERSION))
        .collect()
}

/// Authorization request binding a session key to a verifying-key action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub vvk_id: VvkId,
    pub action: String,
    /// Base64 session public point
    pub session_public: String,
    /// Unix seconds after which the request is void
    pub expiry: u64,
}

impl AuthRequest {
    pub fn new(vvk_id: VvkId, action: &str, session_public: &PublicPoint, expiry: u64) -> Self {
        Self {
            vvk_id,
            action: action.to_string(),
            session_public: session_public.to_base64(),
            expiry,
        }
    }

    /// Canonical payload submitted for authorization
    pub fn payload(&self) -> String {
        json!({
            "vvkId": self.vvk_id.as_str(),
            "action": self.action,
            "sessionPublic": self.session_public,
            "expiry": self.expiry,
        })
        .to_string()
    }
}

/// Unit of work submitted to the threshold signing flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub action: String,
    pub version: String,
    pub subject_type: String,
    pub payload: Vec<u8>,
    authorization: Option<AuthorizationProof>,
}

impl SignRequest {
    pub fn new(action: &str, version: &str, subject_type: &str, payload: Vec<u8>) -> Self {
        Self {
            action: action.to_string(),
            version: version.to_string(),
            subject_type: subject_type.to_string(),
            payload,
            authorization: None,
        }
    }

    /// Capability sub-request with an empty payload, used at initial setup
    pub fn capability(name: &str) -> Self {
        Self::new(name, ACTION_VERSION, SUBJECT_SINGLE_PUBLIC_KEY, Vec::new())
    }

    /// `action:version` tag
    pub fn tag(&self) -> String {
        format!("{}:{}", self.action, self.version)
    }

    /// Bytes the authorization backend signs over
    pub fn data_to_authorize(&self) -> String {
        json!({
            "action": self.tag(),
            "subjectType": self.subject_type,
            "payload": STANDARD.encode(&self.payload),
        })
        .to_string()
    }

    pub fn add_authorization(&mut self, proof: AuthorizationProof) {
        self.authorization = Some(proof);
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    /// The attached proof; submitting without one is an error
    pub fn authorization(&self) -> Result<&AuthorizationProof> {
        self.authorization
            .as_ref()
            .ok_or_else(|| Error::MissingAuthorization(self.tag()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_tags() {
        assert_eq!(
            capability_tags(),
            vec!["TidecloakInit:1".to_string(), "AccessTokenInit:1".to_string()]
        );
    }

    #[test]
    fn test_unauthorized_request_fails() {
        let mut request = SignRequest::capability("TidecloakInit");
        assert!(matches!(
            request.authorization(),
            Err(Error::MissingAuthorization(tag)) if tag == "TidecloakInit:1"
        ));

        request.add_authorization(AuthorizationProof::new("proof"));
        assert_eq!(request.authorization().unwrap().as_str(), "proof");
    }

    #[test]
    fn test_data_to_authorize_encodes_payload() {
        let request = SignRequest::new(ACTION_UPDATE_SETTINGS, "1", SUBJECT_SINGLE_PUBLIC_KEY, b"draft".to_vec());
        let data: serde_json::Value = serde_json::from_str(&request.data_to_authorize()).unwrap();
        assert_eq!(data["action"], "TidecloakUpdateSettings:1");
        assert_eq!(data["payload"], STANDARD.encode(b"draft"));
    }

    #[test]
    fn test_auth_request_payload() {
        let point = PublicPoint::new([2u8; 33]);
        let auth = AuthRequest::new(VvkId::new("42"), ACTION_NEW, &point, 1_700_000_030);
        let data: serde_json::Value = serde_json::from_str(&auth.payload()).unwrap();
        assert_eq!(data["vvkId"], "42");
        assert_eq!(data["action"], "NEW");
        assert_eq!(data["expiry"], 1_700_000_030u64);
        assert_eq!(data["sessionPublic"], point.to_base64());
    }
}
