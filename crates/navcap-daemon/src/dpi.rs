//! Mouse DPI synchronization
//!
//! libinput scales pointer motion by the `MOUSE_DPI` udev property from the
//! hwdb. A virtual clone has no hwdb entry, so the physical mouse's value is
//! copied onto the clone's node through a udev rule.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::error::DpiError;

const DPI_PROPERTY: &str = "MOUSE_DPI=";

/// Extract the `MOUSE_DPI` value from `udevadm info --query=property` output
pub fn parse_mouse_dpi(properties: &str) -> Option<String> {
    properties
        .lines()
        .find_map(|line| line.trim().strip_prefix(DPI_PROPERTY))
        .map(|value| value.trim().to_string())
}

fn udevadm(args: &[&str]) -> Result<String, DpiError> {
    let failed = |reason: String| DpiError::Udevadm {
        args: args.join(" "),
        reason,
    };

    let output = Command::new("udevadm")
        .args(args)
        .output()
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("{}: {}", output.status, stderr.trim())));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Look up the hwdb DPI of the device at `path`
pub fn query_mouse_dpi(path: &Path) -> Result<String, DpiError> {
    let name = format!("--name={}", path.display());
    let properties = udevadm(&["info", "--query=property", &name])?;

    parse_mouse_dpi(&properties).ok_or_else(|| DpiError::NotFound {
        path: path.to_path_buf(),
    })
}

/// udev rule assigning `dpi` to the device node `path`
pub fn dpi_rule(path: &Path, dpi: &str) -> String {
    format!(
        "ACTION==\"add|change\", ENV{{DEVNAME}}==\"{}\", ENV{{MOUSE_DPI}}=\"{}\"\n",
        path.display(),
        dpi
    )
}

/// Replace the rule file at `rules_path` with `rule`
pub fn write_rule(rules_path: &Path, rule: &str) -> Result<(), DpiError> {
    let write_failed = |source| DpiError::WriteRule {
        path: rules_path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(rules_path)
        .map_err(write_failed)?;
    file.write_all(rule.as_bytes()).map_err(write_failed)
}

/// Copy the DPI of the physical mouse at `source` onto its clone at `clone`
pub fn sync_mouse_dpi(source: &Path, clone: &Path, rules_path: &Path) -> Result<(), DpiError> {
    let dpi = query_mouse_dpi(source)?;
    info!("Copying MOUSE_DPI {} from {} to {}", dpi, source.display(), clone.display());

    if !nix::unistd::geteuid().is_root() {
        warn!(
            "Not running as root, writing {} will probably fail",
            rules_path.display()
        );
    }

    write_rule(rules_path, &dpi_rule(clone, &dpi))?;
    udevadm(&["control", "--reload-rules"])?;
    udevadm(&["trigger"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const PROPERTIES: &str = "\
DEVPATH=/devices/pci0000:00/usb1/1-2/input/input7/event5
DEVNAME=/dev/input/event5
ID_INPUT=1
ID_INPUT_MOUSE=1
MOUSE_DPI=800@1000 *1600@1000 3200@1000
SUBSYSTEM=input
";

    #[test]
    fn test_parse_mouse_dpi() {
        assert_eq!(
            parse_mouse_dpi(PROPERTIES).as_deref(),
            Some("800@1000 *1600@1000 3200@1000")
        );
    }

    #[test]
    fn test_parse_mouse_dpi_missing() {
        assert_eq!(parse_mouse_dpi("DEVNAME=/dev/input/event5\nID_INPUT=1\n"), None);
        assert_eq!(parse_mouse_dpi(""), None);
    }

    #[test]
    fn test_parse_mouse_dpi_first_wins() {
        assert_eq!(
            parse_mouse_dpi("MOUSE_DPI=400\nMOUSE_DPI=800\n").as_deref(),
            Some("400")
        );
    }

    #[test]
    fn test_dpi_rule_text() {
        let rule = dpi_rule(Path::new("/dev/input/event21"), "1600@1000");
        assert_eq!(
            rule,
            "ACTION==\"add|change\", ENV{DEVNAME}==\"/dev/input/event21\", ENV{MOUSE_DPI}=\"1600@1000\"\n"
        );
    }

    #[test]
    fn test_write_rule_truncates_and_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("90-test.rules");
        std::fs::write(&rules, "a much longer previous rule that must disappear\n").unwrap();

        write_rule(&rules, "short\n").unwrap();

        assert_eq!(std::fs::read_to_string(&rules).unwrap(), "short\n");

        let created = dir.path().join("91-new.rules");
        write_rule(&created, "rule\n").unwrap();
        let mode = std::fs::metadata(&created).unwrap().permissions().mode();
        // umask can only clear bits
        assert_eq!(mode & 0o7133, 0);
        assert_eq!(mode & 0o600, 0o600);
    }

    #[test]
    fn test_write_rule_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("missing-dir").join("90-test.rules");

        let err = write_rule(&rules, "rule\n").unwrap_err();
        assert!(matches!(err, DpiError::WriteRule { .. }));
        assert!(err.to_string().contains("missing-dir"));
    }
}
