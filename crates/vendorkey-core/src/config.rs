//! Vendor key record
//!
//! The storage collaborator keeps the record as a flat string-keyed map where
//! each value is a bare string or a one-element string array. An empty string
//! or empty array means the field is absent. [`VendorKeyConfig`] is the typed
//! view of that map; the active and candidate key pairs are folded into a
//! single [`KeyState`] so a record can never hold a half-promoted pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::activation::ValidatedActivation;
use crate::error::{Error, Result};
use crate::types::{RotatingKey, VendorId, VvkId};

/// Record keys as written by the storage collaborator
pub mod keys {
    pub const GVRK: &str = "gVRK";
    pub const TEMP_GVRK: &str = "tempgVRK";
    pub const VENDOR_ID: &str = "vendorId";
    pub const TEMP_VENDOR_ID: &str = "tempVendorId";
    pub const VVK_ID: &str = "vvkId";
    pub const CLIENT_ID: &str = "clientId";
    pub const CUSTOMER_ID: &str = "customerId";
    pub const PAYER_PUBLIC: &str = "payerPublic";
    pub const MAX_USER_ACC: &str = "maxUserAcc";
    pub const INITIAL_SESSION_ID: &str = "initialSessionId";
    pub const SYSTEM_HOME_ORK: &str = "systemHomeOrk";
    pub const ACTIVATION_INCOMPLETE: &str = "activationIncomplete";
    /// Hash of the curve generator written when the record is created; kept
    /// verbatim in `extra`
    pub const OBF_GVVK: &str = "obfGVVK";

    pub const ALL: [&str; 12] = [
        GVRK,
        TEMP_GVRK,
        VENDOR_ID,
        TEMP_VENDOR_ID,
        VVK_ID,
        CLIENT_ID,
        CUSTOMER_ID,
        PAYER_PUBLIC,
        MAX_USER_ACC,
        INITIAL_SESSION_ID,
        SYSTEM_HOME_ORK,
        ACTIVATION_INCOMPLETE,
    ];
}

/// One value in the flat record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    Single(String),
    Wrapped(Vec<String>),
}

impl RecordValue {
    /// Wrap a value the way the storage collaborator writes it
    pub fn wrap(value: impl Into<String>) -> Self {
        Self::Wrapped(vec![value.into()])
    }

    /// The value written for an absent field
    pub fn empty() -> Self {
        Self::Wrapped(Vec::new())
    }

    /// The single string held, or None when absent
    pub fn single(&self) -> Option<&str> {
        let value = match self {
            Self::Single(s) => Some(s.as_str()),
            Self::Wrapped(values) => values.first().map(String::as_str),
        };
        value.filter(|v| !v.is_empty())
    }
}

/// Flat string-keyed record
pub type ConfigRecord = BTreeMap<String, RecordValue>;

/// A rotating key with the vendor id allocated for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorKey {
    pub rotating_key: RotatingKey,
    pub vendor_id: VendorId,
}

impl VendorKey {
    pub fn new(rotating_key: RotatingKey, vendor_id: VendorId) -> Self {
        Self {
            rotating_key,
            vendor_id,
        }
    }
}

/// Which rotating key is in force and which is waiting on payment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyState {
    /// Nothing provisioned yet
    #[default]
    None,
    /// First candidate generated, no key active yet
    Pending(VendorKey),
    /// One key in force, no candidate outstanding
    Active(VendorKey),
    /// Key in force with the next cycle's candidate outstanding
    Renewing {
        active: VendorKey,
        candidate: VendorKey,
    },
}

impl KeyState {
    /// Rebuild the state from the four raw record fields
    pub fn from_fields(
        gvrk: Option<&str>,
        vendor_id: Option<&str>,
        temp_gvrk: Option<&str>,
        temp_vendor_id: Option<&str>,
    ) -> Result<Self> {
        let active = pair(keys::GVRK, gvrk, keys::VENDOR_ID, vendor_id)?;
        let candidate = pair(keys::TEMP_GVRK, temp_gvrk, keys::TEMP_VENDOR_ID, temp_vendor_id)?;

        Ok(match (active, candidate) {
            (None, None) => Self::None,
            (None, Some(candidate)) => Self::Pending(candidate),
            (Some(active), None) => Self::Active(active),
            (Some(active), Some(candidate)) => Self::Renewing { active, candidate },
        })
    }

    /// The key currently in force
    pub fn active(&self) -> Option<&VendorKey> {
        match self {
            Self::Active(key) | Self::Renewing { active: key, .. } => Some(key),
            Self::None | Self::Pending(_) => None,
        }
    }

    /// The outstanding candidate, if any
    pub fn candidate(&self) -> Option<&VendorKey> {
        match self {
            Self::Pending(key) | Self::Renewing { candidate: key, .. } => Some(key),
            Self::None | Self::Active(_) => None,
        }
    }

    /// The key a verifying-key commit binds to: the candidate if one is
    /// outstanding, otherwise the active key
    pub fn binding_key(&self) -> Option<&VendorKey> {
        self.candidate().or_else(|| self.active())
    }

    /// Record a freshly generated candidate, replacing any previous one
    pub fn with_candidate(self, candidate: VendorKey) -> Self {
        match self {
            Self::None | Self::Pending(_) => Self::Pending(candidate),
            Self::Active(active) | Self::Renewing { active, .. } => {
                Self::Renewing { active, candidate }
            }
        }
    }

    /// Drop the outstanding candidate, leaving the active key untouched
    pub fn without_candidate(self) -> Self {
        match self {
            Self::None | Self::Pending(_) => Self::None,
            Self::Active(active) | Self::Renewing { active, .. } => Self::Active(active),
        }
    }

    /// Promote the candidate to active
    ///
    /// Returns the new state; the caller persists it in one write, so the
    /// record either holds the old pair or the promoted one.
    pub fn promote(self) -> Result<Self> {
        match self {
            Self::Pending(candidate) | Self::Renewing { candidate, .. } => {
                Ok(Self::Active(candidate))
            }
            Self::None => Err(Error::InvalidState(
                "no candidate key to promote".to_string(),
            )),
            Self::Active(_) => Err(Error::InvalidState(
                "active key has no outstanding candidate".to_string(),
            )),
        }
    }
}

fn pair(
    key_name: &str,
    key: Option<&str>,
    id_name: &str,
    id: Option<&str>,
) -> Result<Option<VendorKey>> {
    match (key, id) {
        (None, None) => Ok(None),
        (Some(key), Some(id)) => {
            let key = RotatingKey::from_hex(key);
            if !key.is_well_formed() {
                return Err(Error::InconsistentRecord(format!(
                    "{} is not a hex-encoded key",
                    key_name
                )));
            }
            Ok(Some(VendorKey::new(key, VendorId::new(id))))
        }
        (Some(_), None) => Err(Error::InconsistentRecord(format!(
            "{} is set but {} is not",
            key_name, id_name
        ))),
        (None, Some(_)) => Err(Error::InconsistentRecord(format!(
            "{} is set but {} is not",
            id_name, key_name
        ))),
    }
}

/// Typed view of the persisted vendor key record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VendorKeyConfig {
    pub key_state: KeyState,
    pub vvk_id: Option<VvkId>,
    pub client_id: Option<String>,
    pub customer_id: Option<String>,
    pub payer_public: Option<String>,
    pub max_user_acc: Option<String>,
    pub initial_session_id: Option<String>,
    pub system_home_ork: Option<String>,
    /// Set when a key was promoted or committed but the activation steps
    /// after it (provider re-sign, next-cycle registration) have not all
    /// completed
    pub activation_incomplete: bool,

    /// Record entries this crate does not interpret, kept verbatim
    pub extra: ConfigRecord,
}

impl VendorKeyConfig {
    /// Parse the flat record
    pub fn from_record(record: &ConfigRecord) -> Result<Self> {
        let get = |name: &str| record.get(name).and_then(RecordValue::single);
        let owned = |name: &str| get(name).map(str::to_string);

        let key_state = KeyState::from_fields(
            get(keys::GVRK),
            get(keys::VENDOR_ID),
            get(keys::TEMP_GVRK),
            get(keys::TEMP_VENDOR_ID),
        )?;

        let extra = record
            .iter()
            .filter(|(name, _)| !keys::ALL.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(Self {
            key_state,
            vvk_id: get(keys::VVK_ID).map(VvkId::new),
            client_id: owned(keys::CLIENT_ID),
            customer_id: owned(keys::CUSTOMER_ID),
            payer_public: owned(keys::PAYER_PUBLIC),
            max_user_acc: owned(keys::MAX_USER_ACC),
            initial_session_id: owned(keys::INITIAL_SESSION_ID),
            system_home_ork: owned(keys::SYSTEM_HOME_ORK),
            activation_incomplete: get(keys::ACTIVATION_INCOMPLETE) == Some("true"),
            extra,
        })
    }

    /// Render the flat record, writing every known key
    pub fn to_record(&self) -> ConfigRecord {
        let mut record = self.extra.clone();
        let mut put = |name: &str, value: Option<&str>| {
            let value = value.map(RecordValue::wrap).unwrap_or_else(RecordValue::empty);
            record.insert(name.to_string(), value);
        };

        let active = self.key_state.active();
        let candidate = self.key_state.candidate();
        put(keys::GVRK, active.map(|k| k.rotating_key.as_hex()));
        put(keys::VENDOR_ID, active.map(|k| k.vendor_id.as_str()));
        put(keys::TEMP_GVRK, candidate.map(|k| k.rotating_key.as_hex()));
        put(keys::TEMP_VENDOR_ID, candidate.map(|k| k.vendor_id.as_str()));
        put(keys::VVK_ID, self.vvk_id.as_ref().map(VvkId::as_str));
        put(keys::CLIENT_ID, self.client_id.as_deref());
        put(keys::CUSTOMER_ID, self.customer_id.as_deref());
        put(keys::PAYER_PUBLIC, self.payer_public.as_deref());
        put(keys::MAX_USER_ACC, self.max_user_acc.as_deref());
        put(keys::INITIAL_SESSION_ID, self.initial_session_id.as_deref());
        put(keys::SYSTEM_HOME_ORK, self.system_home_ork.as_deref());
        put(
            keys::ACTIVATION_INCOMPLETE,
            self.activation_incomplete.then_some("true"),
        );

        record
    }

    /// True until a verifying key has been committed
    pub fn is_initial_setup(&self) -> bool {
        self.vvk_id.is_none()
    }

    /// Home key-node URL without a trailing slash
    pub fn home_ork_url(&self) -> Option<&str> {
        self.system_home_ork
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    /// Store the licensing fields carried by a validated activation package
    pub fn apply_activation(&mut self, activation: &ValidatedActivation) {
        self.initial_session_id = Some(activation.session_id.clone());
        self.customer_id = Some(activation.customer_id.clone());
        self.payer_public = Some(activation.payer_public.clone());
        self.max_user_acc = Some(activation.max_user_acc.clone());
    }

    /// Summary of the key in force, for display and export
    pub fn active_summary(&self) -> LicenseSummary {
        self.summary_for(self.key_state.active())
    }

    /// Summary of the outstanding candidate, for the activity log
    pub fn candidate_summary(&self) -> LicenseSummary {
        self.summary_for(self.key_state.candidate())
    }

    fn summary_for(&self, key: Option<&VendorKey>) -> LicenseSummary {
        LicenseSummary {
            vvk_id: self.vvk_id.clone(),
            customer_id: self.customer_id.clone(),
            gvrk: key.map(|k| k.rotating_key.clone()),
            vendor_id: key.map(|k| k.vendor_id.clone()),
            payer_pub: self.payer_public.clone(),
        }
    }
}

/// License details as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSummary {
    pub vvk_id: Option<VvkId>,
    pub customer_id: Option<String>,
    #[serde(rename = "gVRK")]
    pub gvrk: Option<RotatingKey>,
    pub vendor_id: Option<VendorId>,
    pub payer_pub: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex: &str, id: &str) -> VendorKey {
        VendorKey::new(RotatingKey::from_hex(hex), VendorId::new(id))
    }

    fn record(entries: &[(&str, RecordValue)]) -> ConfigRecord {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_record_value_single() {
        assert_eq!(RecordValue::Single("a".into()).single(), Some("a"));
        assert_eq!(RecordValue::wrap("b").single(), Some("b"));
        assert_eq!(RecordValue::Single(String::new()).single(), None);
        assert_eq!(RecordValue::wrap("").single(), None);
        assert_eq!(RecordValue::empty().single(), None);
    }

    #[test]
    fn test_record_value_accepts_both_json_shapes() {
        let rec: ConfigRecord =
            serde_json::from_str(r#"{"vvkId":"42","vendorId":["v1"],"gVRK":["02aa"]}"#).unwrap();
        let config = VendorKeyConfig::from_record(&rec).unwrap();
        assert_eq!(config.vvk_id, Some(VvkId::new("42")));
        assert_eq!(config.key_state, KeyState::Active(key("02aa", "v1")));
    }

    #[test]
    fn test_empty_record_is_none_state() {
        let config = VendorKeyConfig::from_record(&ConfigRecord::new()).unwrap();
        assert_eq!(config.key_state, KeyState::None);
        assert!(config.is_initial_setup());
    }

    #[test]
    fn test_half_written_pair_is_rejected() {
        let rec = record(&[(keys::TEMP_GVRK, RecordValue::wrap("02bb"))]);
        assert!(matches!(
            VendorKeyConfig::from_record(&rec),
            Err(Error::InconsistentRecord(_))
        ));

        let rec = record(&[(keys::VENDOR_ID, RecordValue::wrap("v1"))]);
        assert!(matches!(
            VendorKeyConfig::from_record(&rec),
            Err(Error::InconsistentRecord(_))
        ));
    }

    #[test]
    fn test_non_hex_key_is_rejected() {
        let rec = record(&[
            (keys::GVRK, RecordValue::wrap("02aa")),
            (keys::VENDOR_ID, RecordValue::wrap("v1")),
            (keys::TEMP_GVRK, RecordValue::wrap("aéééé")),
            (keys::TEMP_VENDOR_ID, RecordValue::wrap("v2")),
        ]);
        let err = VendorKeyConfig::from_record(&rec).unwrap_err();
        assert!(matches!(&err, Error::InconsistentRecord(msg) if msg.contains(keys::TEMP_GVRK)));

        let rec = record(&[
            (keys::GVRK, RecordValue::wrap("not hex")),
            (keys::VENDOR_ID, RecordValue::wrap("v1")),
        ]);
        assert!(matches!(
            VendorKeyConfig::from_record(&rec),
            Err(Error::InconsistentRecord(_))
        ));
    }

    #[test]
    fn test_activation_marker_roundtrip() {
        let config = VendorKeyConfig {
            key_state: KeyState::Active(key("02aa", "v1")),
            activation_incomplete: true,
            ..Default::default()
        };
        let written = config.to_record();
        assert_eq!(
            written.get(keys::ACTIVATION_INCOMPLETE),
            Some(&RecordValue::wrap("true"))
        );
        assert_eq!(VendorKeyConfig::from_record(&written).unwrap(), config);

        let cleared = VendorKeyConfig {
            activation_incomplete: false,
            ..config
        }
        .to_record();
        assert_eq!(cleared.get(keys::ACTIVATION_INCOMPLETE), Some(&RecordValue::empty()));
    }

    #[test]
    fn test_record_roundtrip_preserves_unknown_keys() {
        let rec = record(&[
            (keys::GVRK, RecordValue::wrap("02aa")),
            (keys::VENDOR_ID, RecordValue::wrap("v1")),
            (keys::TEMP_GVRK, RecordValue::wrap("02bb")),
            (keys::TEMP_VENDOR_ID, RecordValue::wrap("v2")),
            (keys::SYSTEM_HOME_ORK, RecordValue::Single("https://ork.example/".into())),
            ("obfGVVK", RecordValue::wrap("abcd")),
        ]);
        let config = VendorKeyConfig::from_record(&rec).unwrap();
        assert_eq!(
            config.key_state,
            KeyState::Renewing {
                active: key("02aa", "v1"),
                candidate: key("02bb", "v2"),
            }
        );
        assert_eq!(config.home_ork_url(), Some("https://ork.example"));

        let written = config.to_record();
        assert_eq!(written.get("obfGVVK"), Some(&RecordValue::wrap("abcd")));
        assert_eq!(written.get(keys::VVK_ID), Some(&RecordValue::empty()));
        assert_eq!(VendorKeyConfig::from_record(&written).unwrap(), config);
    }

    #[test]
    fn test_with_candidate_transitions() {
        let a = key("02aa", "v1");
        let b = key("02bb", "v2");
        let c = key("02cc", "v3");

        assert_eq!(KeyState::None.with_candidate(b.clone()), KeyState::Pending(b.clone()));
        assert_eq!(
            KeyState::Pending(b.clone()).with_candidate(c.clone()),
            KeyState::Pending(c.clone())
        );
        assert_eq!(
            KeyState::Active(a.clone()).with_candidate(b.clone()),
            KeyState::Renewing {
                active: a.clone(),
                candidate: b.clone()
            }
        );
    }

    #[test]
    fn test_promote() {
        let a = key("02aa", "v1");
        let b = key("02bb", "v2");

        assert_eq!(
            KeyState::Pending(b.clone()).promote().unwrap(),
            KeyState::Active(b.clone())
        );
        assert_eq!(
            KeyState::Renewing {
                active: a.clone(),
                candidate: b.clone()
            }
            .promote()
            .unwrap(),
            KeyState::Active(b.clone())
        );
        assert!(matches!(KeyState::None.promote(), Err(Error::InvalidState(_))));
        assert!(matches!(
            KeyState::Active(a).promote(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_binding_key_prefers_candidate() {
        let a = key("02aa", "v1");
        let b = key("02bb", "v2");
        let state = KeyState::Renewing {
            active: a.clone(),
            candidate: b.clone(),
        };
        assert_eq!(state.binding_key(), Some(&b));
        assert_eq!(KeyState::Active(a.clone()).binding_key(), Some(&a));
        assert_eq!(state.without_candidate(), KeyState::Active(a));
    }

    #[test]
    fn test_summary_serializes_with_record_names() {
        let config = VendorKeyConfig {
            key_state: KeyState::Active(key("02aa", "v1")),
            vvk_id: Some(VvkId::new("42")),
            ..Default::default()
        };
        let json = serde_json::to_value(config.active_summary()).unwrap();
        assert_eq!(json["gVRK"], "02aa");
        assert_eq!(json["vendorId"], "v1");
        assert_eq!(json["vvkId"], "42");
    }
}
