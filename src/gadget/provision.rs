//! Shell scripts that create, bind, probe and tear down USB gadgets.
//!
//! Every script here runs through the privileged session. The provisioner
//! only builds text; the controller decides when to run it and how to read
//! the result.

use super::status::{Profile, Role};
use crate::hid::{KEYBOARD_REPORT_DESC, MOUSE_REPORT_DESC, printf_escape};
use crate::privileged::framing::sh_quote;

/// Configfs location tried when the configured root is missing.
pub const FALLBACK_CONFIGFS_ROOT: &str = "/sys/kernel/config/usb_gadget";

const CONFIG_NAME: &str = "c.1";

pub trait Provisioner: Send + Sync {
    /// Create (or reset) the gadget for `profile` and bind it to a UDC.
    fn create_and_bind(&self, profile: &Profile) -> String;

    /// Unbind `gadget_dir` and remove it.
    fn unbind_and_cleanup(&self, gadget_dir: &str) -> String;

    /// Unbind every gadget we can find.
    fn panic_stop(&self) -> String;

    /// Print one UDC name per line.
    fn list_udcs(&self) -> String;

    /// Print the platform's preferred controller, for hosts without `/sys/class/udc`.
    fn controller_property(&self) -> String;

    /// Succeed when configfs is already mounted.
    fn configfs_check(&self) -> String;

    /// Try to mount configfs, then succeed when it is there.
    fn configfs_mount(&self) -> String;

    /// Succeed when `gadget_dir` is bound to a controller.
    fn bound_check(&self, gadget_dir: &str) -> String;

    /// Print the state of the controller `gadget_dir` is bound to.
    fn udc_state(&self, gadget_dir: &str) -> String;
}

/// Linux configfs (`usb_gadget`) provisioning.
#[derive(Debug, Clone)]
pub struct ConfigfsProvisioner {
    root: String,
}

impl ConfigfsProvisioner {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    fn base_select(&self) -> String {
        format!(
            "CFGBASE={}\n[ -d \"$CFGBASE\" ] || CFGBASE={}\n",
            sh_quote(&self.root),
            sh_quote(FALLBACK_CONFIGFS_ROOT)
        )
    }
}

impl Default for ConfigfsProvisioner {
    fn default() -> Self {
        Self::new("/config/usb_gadget")
    }
}

/// Keep gadget names to characters configfs and the shell both accept.
pub fn sanitize_gadget_name(name: &str) -> String {
    let trimmed = name.trim();
    let name = if trimmed.is_empty() { "gadgetfs" } else { trimmed };
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A plausible UDC name: `[A-Za-z0-9._-]+`.
pub fn is_udc_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// UDC names from `list_udcs` output.
pub fn parse_udc_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim().trim_matches('\r'))
        .filter(|l| is_udc_name(l))
        .map(str::to_string)
        .collect()
}

/// The controller from `controller_property` output, either the bare value
/// or a `[sys.usb.controller]: [name]` property dump line.
pub fn parse_controller_property(stdout: &str) -> Option<String> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if let Some(direct) = lines.iter().find(|l| is_udc_name(l)) {
        return Some(direct.to_string());
    }
    lines
        .iter()
        .find_map(|l| l.strip_prefix("[sys.usb.controller]: ["))
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
        .filter(|v| is_udc_name(v))
        .map(str::to_string)
}

fn hid_function(name: &str, protocol: u8, report_length: u8, desc: &[u8]) -> String {
    format!(
        "mkdir -p functions/{name}\n\
         echo {protocol} > functions/{name}/protocol\n\
         echo 1 > functions/{name}/subclass\n\
         echo {report_length} > functions/{name}/report_length\n\
         printf '{}' > functions/{name}/report_desc\n",
        printf_escape(desc)
    )
}

fn keyboard_function(name: &str) -> String {
    hid_function(name, 1, 8, KEYBOARD_REPORT_DESC)
}

fn mouse_function(name: &str) -> String {
    hid_function(name, 2, 4, MOUSE_REPORT_DESC)
}

impl Provisioner for ConfigfsProvisioner {
    fn create_and_bind(&self, profile: &Profile) -> String {
        let gadget = sanitize_gadget_name(&profile.gadget_dir());
        let mut s = String::from("set -e\n");
        s.push_str(&self.base_select());
        s.push_str(
            "if [ ! -d \"$CFGBASE\" ]; then\n  echo \"configfs usb_gadget not found\" >&2\n  exit 2\nfi\n",
        );

        // Pick the controller before touching anything.
        s.push_str(
            "UDC_NAME=\"\"\n\
             if command -v getprop >/dev/null 2>&1; then\n  UDC_NAME=$(getprop sys.usb.controller 2>/dev/null | tr -d '\\r')\nfi\n\
             if [ -z \"$UDC_NAME\" ]; then\n  UDC_NAME=$(ls /sys/class/udc 2>/dev/null | head -n1 | tr -d '\\r')\nfi\n\
             if [ -z \"$UDC_NAME\" ]; then\n  echo \"No UDC found in /sys/class/udc\" >&2\n  exit 3\nfi\n",
        );

        s.push_str(&format!("G=\"$CFGBASE/{gadget}\"\n"));
        s.push_str(
            "if [ -d \"$G\" ]; then\n  echo \"Gadget already exists: $G\" >&2\n  (echo \"\" > \"$G/UDC\") 2>/dev/null || true\nelse\n  mkdir -p \"$G\"\nfi\ncd \"$G\"\n",
        );
        // A reused directory may still carry another role's functions.
        s.push_str(&format!(
            "mkdir -p configs/{CONFIG_NAME} 2>/dev/null || true\n\
             rm -f configs/{CONFIG_NAME}/hid.* 2>/dev/null || true\n\
             rm -rf functions/* 2>/dev/null || true\n"
        ));
        s.push_str(&format!(
            "echo 0x{:04x} > idVendor\necho 0x{:04x} > idProduct\necho 0x0200 > bcdUSB\necho 0x0100 > bcdDevice\n",
            profile.vendor_id, profile.product_id
        ));
        s.push_str(&format!(
            "mkdir -p strings/0x409\necho {} > strings/0x409/manufacturer\necho {} > strings/0x409/product\necho {} > strings/0x409/serialnumber\n",
            sh_quote(&profile.manufacturer),
            sh_quote(&profile.product),
            sh_quote(&profile.serial_number)
        ));
        s.push_str(&format!(
            "mkdir -p configs/{CONFIG_NAME}/strings/0x409\n\
             echo \"Config 1\" > configs/{CONFIG_NAME}/strings/0x409/configuration\n\
             echo {} > configs/{CONFIG_NAME}/MaxPower\n",
            profile.max_power_ma.clamp(2, 500)
        ));

        match profile.role {
            Role::Keyboard => s.push_str(&keyboard_function("hid.usb0")),
            Role::Mouse => s.push_str(&mouse_function("hid.usb0")),
            Role::Composite => {
                s.push_str(&keyboard_function("hid.usb0"));
                s.push_str(&mouse_function("hid.usb1"));
            }
        }

        s.push_str(&format!(
            "for f in $(ls -1 functions 2>/dev/null); do\n  [ -e \"configs/{CONFIG_NAME}/$f\" ] || ln -s \"functions/$f\" \"configs/{CONFIG_NAME}/$f\"\ndone\n"
        ));
        // Only gadgets on our controller are unbound.
        s.push_str(
            "for U in \"$CFGBASE\"/*/UDC; do\n  [ -f \"$U\" ] || continue\n  [ \"$U\" = \"$G/UDC\" ] && continue\n  CUR=$(cat \"$U\" 2>/dev/null | tr -d '\\r')\n  if [ \"$CUR\" = \"$UDC_NAME\" ]; then\n    (echo \"\" > \"$U\") 2>/dev/null || true\n  fi\ndone\n",
        );
        s.push_str("echo \"$UDC_NAME\" > UDC\necho \"Bound to UDC: $UDC_NAME\"\n");
        s
    }

    fn unbind_and_cleanup(&self, gadget_dir: &str) -> String {
        let gadget = sanitize_gadget_name(gadget_dir);
        format!(
            "{}G=\"$CFGBASE/{gadget}\"\n\
             [ -d \"$G\" ] || exit 0\n\
             (echo \"\" > \"$G/UDC\") 2>/dev/null || true\n\
             rm -f \"$G/configs/{CONFIG_NAME}\"/hid.* 2>/dev/null || true\n\
             rmdir \"$G\"/configs/*/strings/* \"$G\"/configs/* \"$G\"/functions/* \"$G\"/strings/* \"$G\" 2>/dev/null || rm -rf \"$G\" 2>/dev/null || true\n",
            self.base_select()
        )
    }

    fn panic_stop(&self) -> String {
        format!(
            "{}if [ -d \"$CFGBASE\" ]; then\n  for U in \"$CFGBASE\"/*/UDC; do\n    [ -f \"$U\" ] || continue\n    (echo \"\" > \"$U\") 2>/dev/null || true\n  done\nfi\n",
            self.base_select()
        )
    }

    fn list_udcs(&self) -> String {
        "ls -1 /sys/class/udc 2>/dev/null || true".to_string()
    }

    fn controller_property(&self) -> String {
        "command -v getprop >/dev/null 2>&1 && getprop sys.usb.controller 2>/dev/null || true".to_string()
    }

    fn configfs_check(&self) -> String {
        format!(
            "test -d {} || test -d {}",
            sh_quote(&self.root),
            sh_quote(FALLBACK_CONFIGFS_ROOT)
        )
    }

    fn configfs_mount(&self) -> String {
        format!(
            "if [ -d /config ] && [ ! -d /config/usb_gadget ]; then\n  mount | grep -q \" /config \" || mount -t configfs none /config 2>/dev/null\nfi\n\
             if [ -d /sys/kernel ] && [ ! -d {fb} ]; then\n  mkdir -p /sys/kernel/config 2>/dev/null\n  mount | grep -q \" /sys/kernel/config \" || mount -t configfs none /sys/kernel/config 2>/dev/null\nfi\n\
             {check}",
            fb = FALLBACK_CONFIGFS_ROOT,
            check = self.configfs_check()
        )
    }

    fn bound_check(&self, gadget_dir: &str) -> String {
        let gadget = sanitize_gadget_name(gadget_dir);
        format!(
            "{}test -f \"$CFGBASE/{gadget}/UDC\" && test -s \"$CFGBASE/{gadget}/UDC\"",
            self.base_select()
        )
    }

    fn udc_state(&self, gadget_dir: &str) -> String {
        let gadget = sanitize_gadget_name(gadget_dir);
        format!(
            "{}G=\"$CFGBASE/{gadget}\"\n\
             [ -f \"$G/UDC\" ] || exit 1\n\
             UDC_NAME=$(cat \"$G/UDC\" 2>/dev/null | tr -d '\\r')\n\
             [ -n \"$UDC_NAME\" ] || exit 1\n\
             if [ -f \"/sys/class/udc/$UDC_NAME/state\" ]; then\n  cat \"/sys/class/udc/$UDC_NAME/state\" 2>/dev/null | tr -d '\\r'\nelse\n  echo unknown\nfi\n",
            self.base_select()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(role: &str) -> Profile {
        Profile::from_json(&json!({
            "id": "Prof-1234567890XYZ",
            "roleType": role,
            "manufacturer": "O'Brien",
            "vendorId": "0x1d6b",
            "productId": "0x0104",
            "maxPowerMa": 900
        }))
        .unwrap()
    }

    #[test]
    fn test_sanitize_and_udc_names() {
        assert_eq!(sanitize_gadget_name("a b/c"), "a_b_c");
        assert_eq!(sanitize_gadget_name("  "), "gadgetfs");
        assert!(is_udc_name("musb-hdrc.0.auto"));
        assert!(!is_udc_name("a b"));
        assert_eq!(parse_udc_list("dummy_udc.0\n\nbad name\nx.y\n"), vec!["dummy_udc.0", "x.y"]);
    }

    #[test]
    fn test_controller_property_forms() {
        assert_eq!(parse_controller_property("a600000.dwc3\n").as_deref(), Some("a600000.dwc3"));
        assert_eq!(
            parse_controller_property("[sys.usb.controller]: [a600000.dwc3]").as_deref(),
            Some("a600000.dwc3")
        );
        assert_eq!(parse_controller_property(""), None);
    }

    #[test]
    fn test_create_script_composite() {
        let p = ConfigfsProvisioner::new("/config/usb_gadget");
        let s = p.create_and_bind(&profile("composite"));
        assert!(s.starts_with("set -e\nCFGBASE='/config/usb_gadget'\n"));
        assert!(s.contains("G=\"$CFGBASE/gadgetfs_prof-1234567\"\n"));
        assert!(s.contains("echo 0x1d6b > idVendor\necho 0x0104 > idProduct\n"));
        assert!(s.contains(r"echo 'O'\''Brien' > strings/0x409/manufacturer"));
        assert!(s.contains("echo 500 > configs/c.1/MaxPower"));
        assert!(s.contains("echo 1 > functions/hid.usb0/protocol"));
        assert!(s.contains("echo 2 > functions/hid.usb1/protocol"));
        assert!(s.contains("echo 4 > functions/hid.usb1/report_length"));
        assert!(s.contains(&format!("printf '{}'", printf_escape(KEYBOARD_REPORT_DESC))));
        assert!(s.ends_with("echo \"Bound to UDC: $UDC_NAME\"\n"));
    }

    #[test]
    fn test_create_script_single_role() {
        let p = ConfigfsProvisioner::default();
        let s = p.create_and_bind(&profile("mouse"));
        assert!(s.contains("echo 2 > functions/hid.usb0/protocol"));
        assert!(!s.contains("hid.usb1"));
    }

    #[test]
    fn test_probe_scripts() {
        let p = ConfigfsProvisioner::default();
        assert!(p.bound_check("gadgetfs_x").ends_with("test -s \"$CFGBASE/gadgetfs_x/UDC\""));
        assert!(p.udc_state("g").contains("/sys/class/udc/$UDC_NAME/state"));
        assert!(p.unbind_and_cleanup("g").contains("[ -d \"$G\" ] || exit 0"));
        assert!(p.configfs_mount().ends_with(&p.configfs_check()));
    }
}
