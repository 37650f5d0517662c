//! Inventory provider: the agent-side external collaborator that yields a
//! `SystemInfo` snapshot and an enumeration of installed software. Grounded
//! on `Client/sysinfo.cpp` and `Client/softmgr.cpp` for field semantics,
//! re-expressed over the cross-platform `sysinfo` crate instead of Win32
//! calls (registry scanning is kept behind a `cfg(windows)` path since it has
//! no portable equivalent).

use std::net::UdpSocket;

use sysinfo::{CpuExt, DiskExt, NetworkExt, System, SystemExt};

use crate::messages::{SoftwareEntry, SysInfoPayload};

/// External collaborator interface the agent runtime depends on. A production
/// deployment supplies a richer implementation; `SysinfoInventory` is a
/// reasonable cross-platform default.
pub trait InventoryProvider: Send + Sync {
    fn system_info(&self) -> SysInfoPayload;
    fn installed_software(&self) -> Vec<SoftwareEntry>;
}

/// Default `InventoryProvider` backed by the `sysinfo` crate for
/// hardware/OS facts and a best-effort platform-specific scan for installed
/// software.
#[derive(Debug, Default)]
pub struct SysinfoInventory;

impl InventoryProvider for SysinfoInventory {
    fn system_info(&self) -> SysInfoPayload {
        let mut sys = System::new_all();
        sys.refresh_all();

        let computer_name = sys.host_name().unwrap_or_else(|| "unknown".to_string());
        let os_version = sys
            .long_os_version()
            .unwrap_or_else(|| "unknown".to_string());
        let cpu_info = cpu_description(&sys);
        let total_memory = sys.total_memory() / 1024;
        let free_memory = sys.available_memory() / 1024;
        let disk_info = disk_summary(&sys);
        let mac_address = primary_mac_address(&sys);
        let ip_address = primary_ip_address().unwrap_or_default();

        SysInfoPayload {
            computer_name,
            os_version,
            cpu_info,
            total_memory,
            free_memory,
            disk_info,
            mac_address,
            ip_address,
        }
    }

    fn installed_software(&self) -> Vec<SoftwareEntry> {
        let mut entries = platform_software_scan();
        dedupe_software(&mut entries);
        entries
    }
}

fn cpu_description(sys: &System) -> String {
    let brand = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "Unknown CPU".to_string());
    format!("{} ({} cores)", brand, sys.cpus().len())
}

fn disk_summary(sys: &System) -> String {
    sys.disks()
        .iter()
        .map(|disk| {
            let total_gb = disk.total_space() / (1024 * 1024 * 1024);
            let free_gb = disk.available_space() / (1024 * 1024 * 1024);
            format!(
                "{} {}GB/{}GB",
                disk.mount_point().display(),
                free_gb,
                total_gb
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Picks the first non-loopback interface with a usable MAC address.
fn primary_mac_address(sys: &System) -> String {
    for (name, data) in sys.networks() {
        if name.to_lowercase().contains("lo") {
            continue;
        }
        let mac = data.mac_address().to_string();
        if !mac.is_empty() && mac != "00:00:00:00:00:00" {
            return mac;
        }
    }
    String::new()
}

/// Discovers the outbound-facing IPv4 address without sending any traffic:
/// `connect` on a UDP socket only consults the routing table.
fn primary_ip_address() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    let ip = addr.ip().to_string();
    if ip.starts_with("127.") {
        None
    } else {
        Some(ip)
    }
}

/// Folds entries with the same `(name, version)` and drops entries with no
/// uninstall command, matching `softmgr.cpp`'s registry scan filter.
fn dedupe_software(entries: &mut Vec<SoftwareEntry>) {
    entries.retain(|entry| !entry.uninstall_cmd.is_empty());
    let mut seen = std::collections::HashSet::new();
    entries.retain(|entry| seen.insert((entry.name.clone(), entry.version.clone())));
}

#[cfg(target_os = "windows")]
fn platform_software_scan() -> Vec<SoftwareEntry> {
    use winreg::enums::*;
    use winreg::RegKey;

    const UNINSTALL_PATHS: &[(HKEY, &str)] = &[
        (
            HKEY_LOCAL_MACHINE,
            "SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
        ),
        (
            HKEY_LOCAL_MACHINE,
            "SOFTWARE\\WOW6432Node\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
        ),
        (
            HKEY_CURRENT_USER,
            "SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
        ),
    ];

    let mut entries = Vec::new();
    for (hive, path) in UNINSTALL_PATHS {
        let root = RegKey::predef(*hive);
        let Ok(uninstall) = root.open_subkey(path) else {
            continue;
        };
        for sub_name in uninstall.enum_keys().flatten() {
            let Ok(sub) = uninstall.open_subkey(&sub_name) else {
                continue;
            };
            let name: String = sub.get_value("DisplayName").unwrap_or_default();
            if name.is_empty() || name.contains("Update") || name.contains("KB") {
                continue;
            }
            let is_system_component: u32 = sub.get_value("SystemComponent").unwrap_or(0);
            if is_system_component != 0 {
                continue;
            }
            entries.push(SoftwareEntry {
                name,
                version: sub.get_value("DisplayVersion").unwrap_or_default(),
                publisher: sub.get_value("Publisher").unwrap_or_default(),
                install_date: sub.get_value("InstallDate").unwrap_or_default(),
                install_path: sub.get_value("InstallLocation").unwrap_or_default(),
                uninstall_cmd: sub.get_value("UninstallString").unwrap_or_default(),
            });
        }
    }
    entries
}

/// No portable equivalent to the Windows uninstall registry exists; other
/// platforms return an empty list until a platform-specific provider is
/// plugged in via `InventoryProvider`.
#[cfg(not(target_os = "windows"))]
fn platform_software_scan() -> Vec<SoftwareEntry> {
    Vec::new()
}
