use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lanmgr::{InstallerError, InventoryProvider};
use lanmgr::messages::{SoftwareEntry, SysInfoPayload};

/// Deterministic inventory for tests: fixed fields, no real OS queries.
pub struct FakeInventory;

impl InventoryProvider for FakeInventory {
    fn system_info(&self) -> SysInfoPayload {
        SysInfoPayload {
            computer_name: "TEST-HOST".into(),
            os_version: "Test OS 1.0".into(),
            cpu_info: "Test CPU (4 cores)".into(),
            total_memory: 16384,
            free_memory: 8192,
            disk_info: "C:\\ 50GB/100GB".into(),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
            ip_address: "127.0.0.1".into(),
        }
    }

    fn installed_software(&self) -> Vec<SoftwareEntry> {
        vec![SoftwareEntry {
            name: "Widget".into(),
            version: "1.0".into(),
            publisher: "Acme".into(),
            install_date: "2026-01-01".into(),
            install_path: "C:\\Widget".into(),
            uninstall_cmd: "widget-uninstall.exe".into(),
        }]
    }
}

/// Executor that always succeeds, recording how many times it ran.
pub struct CountingExecutor {
    install_calls: AtomicUsize,
    uninstall_calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            install_calls: AtomicUsize::new(0),
            uninstall_calls: AtomicUsize::new(0),
        })
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    pub fn uninstall_calls(&self) -> usize {
        self.uninstall_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl lanmgr::PackageExecutor for CountingExecutor {
    async fn install(&self, _file_path: &str, _args: &str) -> Result<(), InstallerError> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn uninstall(&self, _uninstall_cmd: &str, _args: &str) -> Result<(), InstallerError> {
        self.uninstall_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
