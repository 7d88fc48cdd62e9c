//! Candidate serial port enumeration.
//!
//! The controller is a USB-attached board with no stable identity, so discovery
//! starts from the ports the OS reports, narrowed to platform-specific device
//! names. The list is deduplicated and sorted so scans are deterministic.

use std::collections::BTreeSet;

/// Source of candidate port paths, in scan order.
pub trait PortEnumerator: Send + Sync {
    /// List candidate ports. Never fails; no candidates is an empty list.
    fn list_candidates(&self) -> Vec<String>;
}

/// Naming rules for serial device nodes on Linux.
pub const LINUX_PREFIXES: &[&str] = &["ttyACM", "ttyUSB", "ttyS"];

/// Naming rules for serial device nodes on macOS.
pub const MACOS_PREFIXES: &[&str] = &["tty.usb", "tty.usbserial"];

/// Naming rules for COM ports on Windows.
pub const WINDOWS_PREFIXES: &[&str] = &["COM"];

/// Enumerates ports present on this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list_candidates(&self) -> Vec<String> {
        list_candidates()
    }
}

/// A fixed candidate list, used when the port is pinned in configuration.
#[derive(Debug, Clone, Default)]
pub struct FixedPorts(pub Vec<String>);

impl PortEnumerator for FixedPorts {
    fn list_candidates(&self) -> Vec<String> {
        let unique: BTreeSet<String> = self.0.iter().cloned().collect();
        unique.into_iter().collect()
    }
}

/// Device-name prefixes for the current platform. Empty when unsupported.
pub fn platform_prefixes() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        WINDOWS_PREFIXES
    } else if cfg!(target_os = "linux") {
        LINUX_PREFIXES
    } else if cfg!(target_os = "macos") {
        MACOS_PREFIXES
    } else {
        &[]
    }
}

/// List candidate ports for the current platform.
pub fn list_candidates() -> Vec<String> {
    filter_candidates(available_port_names(), platform_prefixes())
}

#[cfg(feature = "serial")]
fn available_port_names() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|info| info.port_name).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Could not enumerate serial ports");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "serial"))]
fn available_port_names() -> Vec<String> {
    tracing::debug!("serial support disabled, no ports to enumerate");
    Vec::new()
}

/// Keep the port names whose device name starts with one of `prefixes`,
/// returning them sorted and unique.
///
/// Names are matched on the part after the last `/`, so both `/dev/ttyUSB0`
/// and `COM3` work.
pub fn filter_candidates<I>(names: I, prefixes: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let matched: BTreeSet<String> = names
        .into_iter()
        .filter(|name| {
            let device = name.rsplit('/').next().unwrap_or(name);
            prefixes.iter().any(|prefix| device.starts_with(prefix))
        })
        .collect();
    matched.into_iter().collect()
}
