//! Gadget lifecycle state, the status snapshot, and device profiles.

use crate::error::GadgetError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GadgetState {
    #[default]
    Idle,
    Activating,
    Active,
    Error,
}

impl GadgetState {
    pub fn as_str(self) -> &'static str {
        match self {
            GadgetState::Idle => "IDLE",
            GadgetState::Activating => "ACTIVATING",
            GadgetState::Active => "ACTIVE",
            GadgetState::Error => "ERROR",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Idle -> Active` is the restore edge taken at startup when a gadget
    /// is still bound. Anything may fall back to `Idle` (panic stop).
    pub fn can_transition_to(self, next: GadgetState) -> bool {
        use GadgetState::*;
        matches!(
            (self, next),
            (Idle, Activating)
                | (Activating, Active)
                | (Activating, Error)
                | (Error, Activating)
                | (Idle, Active)
                | (_, Idle)
        )
    }
}

impl fmt::Display for GadgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the gadget, replaced wholesale on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GadgetStatus {
    pub root_available: bool,
    pub support_available: bool,
    pub udc_list: Vec<String>,
    pub state: GadgetState,
    pub active_profile_id: Option<String>,
    pub message: Option<String>,
    pub keyboard_writer_ready: bool,
    pub mouse_writer_ready: bool,
    pub device_connected: bool,
    pub udc_state: Option<String>,
}

impl GadgetStatus {
    pub fn is_active(&self) -> bool {
        self.state == GadgetState::Active
    }

    /// The polled controller state reads "configured".
    pub fn udc_configured(&self) -> bool {
        self.udc_state
            .as_deref()
            .is_some_and(|s| s.trim().to_ascii_lowercase().contains("configured"))
    }

    pub fn host_connected(&self) -> bool {
        self.device_connected || self.udc_configured()
    }
}

/// Which HID functions a gadget exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Keyboard,
    Mouse,
    Composite,
}

impl Role {
    /// Unrecognized role names build a composite gadget.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keyboard" => Role::Keyboard,
            "mouse" => Role::Mouse,
            _ => Role::Composite,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Keyboard => "keyboard",
            Role::Mouse => "mouse",
            Role::Composite => "composite",
        }
    }

    /// Keyboard node under `prefix` (e.g. `/dev/hidg`), if the role has one.
    pub fn keyboard_device(self, prefix: &str) -> Option<String> {
        match self {
            Role::Mouse => None,
            Role::Keyboard | Role::Composite => Some(format!("{prefix}0")),
        }
    }

    pub fn mouse_device(self, prefix: &str) -> Option<String> {
        match self {
            Role::Keyboard => None,
            Role::Mouse => Some(format!("{prefix}0")),
            Role::Composite => Some(format!("{prefix}1")),
        }
    }
}

/// A gadget identity to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub max_power_ma: u32,
}

impl Profile {
    /// Build a profile from loosely typed JSON.
    ///
    /// String fields fall back to defaults when missing or blank; numeric
    /// fields accept numbers, decimal strings or `0x` hex strings. Values in a
    /// nested `tunables` object win over top-level ones.
    pub fn from_json(value: &Value) -> Result<Self, GadgetError> {
        let id = value
            .get("id")
            .map(json_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GadgetError::InvalidProfile("profile id missing".to_string()))?;

        let tunables = value.get("tunables").filter(|t| t.is_object());
        let field = |key: &str| -> Option<String> {
            tunables
                .and_then(|t| t.get(key))
                .or_else(|| value.get(key))
                .filter(|v| !v.is_null())
                .map(json_text)
                .filter(|s| !s.trim().is_empty())
        };
        let number = |key: &str, fallback: i64| -> i64 {
            field(key).and_then(|raw| parse_hex_or_dec(&raw)).unwrap_or(fallback)
        };

        let short_id: String = id.chars().take(12).collect();
        Ok(Self {
            name: field("name").unwrap_or_else(|| "Profile".to_string()),
            role: Role::parse(&field("roleType").unwrap_or_else(|| "mouse".to_string())),
            manufacturer: field("manufacturer").unwrap_or_else(|| "KaijinLab".to_string()),
            product: field("product").unwrap_or_else(|| "GadgetFS".to_string()),
            serial_number: field("serialNumber").unwrap_or_else(|| format!("GadgetFS:{short_id}")),
            vendor_id: (number("vendorId", 0x1d6b) & 0xFFFF) as u16,
            product_id: (number("productId", 0x0104) & 0xFFFF) as u16,
            max_power_ma: number("maxPowerMa", 250).clamp(0, u32::MAX as i64) as u32,
            id,
        })
    }

    /// Configfs directory name for this profile.
    pub fn gadget_dir(&self) -> String {
        let short: String = self.id.chars().take(12).collect();
        format!("gadgetfs_{}", short.to_lowercase())
    }
}

fn json_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_hex_or_dec(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transitions() {
        use GadgetState::*;
        assert!(Idle.can_transition_to(Activating));
        assert!(Activating.can_transition_to(Error));
        assert!(Error.can_transition_to(Activating));
        assert!(Idle.can_transition_to(Active));
        assert!(Active.can_transition_to(Idle));
        assert!(!Active.can_transition_to(Activating));
        assert!(!Error.can_transition_to(Active));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = GadgetStatus {
            state: GadgetState::Active,
            udc_state: Some("configured".into()),
            ..Default::default()
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["state"], "ACTIVE");
        assert_eq!(v["udcState"], "configured");
        assert_eq!(v["keyboardWriterReady"], false);
        assert!(status.host_connected());
    }

    #[test]
    fn test_profile_defaults() {
        let p = Profile::from_json(&json!({"id": "ABCDEFGHIJKLMNOP"})).unwrap();
        assert_eq!(p.name, "Profile");
        assert_eq!(p.role, Role::Mouse);
        assert_eq!(p.manufacturer, "KaijinLab");
        assert_eq!(p.serial_number, "GadgetFS:ABCDEFGHIJKL");
        assert_eq!(p.vendor_id, 0x1d6b);
        assert_eq!(p.product_id, 0x0104);
        assert_eq!(p.max_power_ma, 250);
        assert_eq!(p.gadget_dir(), "gadgetfs_abcdefghijkl");
    }

    #[test]
    fn test_profile_numbers_and_tunables() {
        let p = Profile::from_json(&json!({
            "id": "kb1",
            "roleType": "Keyboard",
            "vendorId": "0x046d",
            "productId": 49948,
            "maxPowerMa": "100",
            "tunables": {"product": "Desk Keys", "maxPowerMa": "0x20"}
        }))
        .unwrap();
        assert_eq!(p.role, Role::Keyboard);
        assert_eq!(p.vendor_id, 0x046d);
        assert_eq!(p.product_id, 49948);
        assert_eq!(p.product, "Desk Keys");
        assert_eq!(p.max_power_ma, 32);
    }

    #[test]
    fn test_profile_requires_id() {
        let err = Profile::from_json(&json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, GadgetError::InvalidProfile(_)));
        assert!(Profile::from_json(&json!({"id": "  "})).is_err());
    }

    #[test]
    fn test_role_devices() {
        assert_eq!(Role::Keyboard.keyboard_device("/dev/hidg").as_deref(), Some("/dev/hidg0"));
        assert_eq!(Role::Keyboard.mouse_device("/dev/hidg"), None);
        assert_eq!(Role::Mouse.mouse_device("/dev/hidg").as_deref(), Some("/dev/hidg0"));
        assert_eq!(Role::Composite.mouse_device("/dev/hidg").as_deref(), Some("/dev/hidg1"));
        assert_eq!(Role::parse("weird"), Role::Composite);
    }
}
