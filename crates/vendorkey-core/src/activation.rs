//! Activation packages issued by the payer service after checkout

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::types::{RotatingKey, VendorId};

/// Server-issued activation package, as received
///
/// Every field is optional at this stage; [`validate_activation_package`]
/// decides whether the package can be trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationPackage {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub payer_public: Option<String>,

    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub max_user_acc: Option<String>,

    #[serde(
        rename = "gVRK",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub gvrk: Option<String>,

    /// Vendor id the license was issued for
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
}

impl ActivationPackage {
    /// Parse the JSON document carried in a checkout response
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// An activation package that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedActivation {
    pub session_id: String,
    pub customer_id: String,
    pub payer_public: String,
    pub max_user_acc: String,
    pub rotating_key: RotatingKey,
    pub license_id: VendorId,
}

/// Validate an activation package against the outstanding candidate
///
/// Fails if any required field is missing or empty, or if a pending
/// candidate key / vendor id exists and the package names a different one.
pub fn validate_activation_package(
    pkg: &ActivationPackage,
    pending_key: Option<&RotatingKey>,
    pending_vendor_id: Option<&VendorId>,
) -> Result<ValidatedActivation> {
    let gvrk = required("gVRK", &pkg.gvrk)?;
    let payer_public = required("payerPublic", &pkg.payer_public)?;
    let license_id = required("licenseId", &pkg.license_id)?;
    let max_user_acc = required("maxUserAcc", &pkg.max_user_acc)?;
    let session_id = required("sessionId", &pkg.session_id)?;
    let customer_id = required("customerId", &pkg.customer_id)?;

    if let Some(pending) = pending_key {
        if pending.as_hex() != gvrk {
            return Err(Error::Validation(
                "activation package is for a different rotating key".to_string(),
            ));
        }
    }

    if let Some(pending) = pending_vendor_id {
        if pending.as_str() != license_id {
            return Err(Error::Validation(
                "activation package is for a different license request".to_string(),
            ));
        }
    }

    Ok(ValidatedActivation {
        session_id: session_id.to_string(),
        customer_id: customer_id.to_string(),
        payer_public: payer_public.to_string(),
        max_user_acc: max_user_acc.to_string(),
        rotating_key: RotatingKey::from_hex(gvrk),
        license_id: VendorId::new(license_id),
    })
}

fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("activation package is missing {}", name)))
}

/// Accept strings, numbers and booleans; the payer service is not consistent
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar, got {}",
            other
        ))),
    }
}
