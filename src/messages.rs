//! JSON payload shapes carried inside frames. Every struct here round-trips
//! through `serde_json` exactly as laid out in the wire schema.

use serde::{Deserialize, Serialize};

/// Sent once by the agent immediately after a TCP connect succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    #[serde(rename = "computerName")]
    pub computer_name: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
    #[serde(rename = "macAddress")]
    pub mac_address: String,
    #[serde(rename = "osVersion")]
    pub os_version: String,
}

/// Full hardware/OS snapshot returned for `GET_SYSINFO`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SysInfoPayload {
    #[serde(rename = "computerName")]
    pub computer_name: String,
    #[serde(rename = "osVersion")]
    pub os_version: String,
    #[serde(rename = "cpuInfo")]
    pub cpu_info: String,
    #[serde(rename = "totalMemory")]
    pub total_memory: u64,
    #[serde(rename = "freeMemory")]
    pub free_memory: u64,
    #[serde(rename = "diskInfo")]
    pub disk_info: String,
    #[serde(rename = "macAddress")]
    pub mac_address: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
}

/// One installed-software record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SoftwareEntry {
    pub name: String,
    pub version: String,
    pub publisher: String,
    #[serde(rename = "installDate")]
    pub install_date: String,
    #[serde(rename = "installPath")]
    pub install_path: String,
    #[serde(rename = "uninstallCmd")]
    pub uninstall_cmd: String,
}

/// Reply to `GET_SOFTWARE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SoftwareListPayload {
    pub software: Vec<SoftwareEntry>,
    pub count: usize,
}

impl SoftwareListPayload {
    pub fn new(software: Vec<SoftwareEntry>) -> Self {
        let count = software.len();
        Self { software, count }
    }
}

/// Direct-install request: assumes the file already exists on the agent.
/// Usage from the controller's public API is undocumented upstream (see
/// Design Notes); kept for completeness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallSoftwarePayload {
    #[serde(rename = "filePath")]
    pub file_path: String,
    pub args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UninstallSoftwarePayload {
    pub name: String,
    #[serde(rename = "uninstallCmd")]
    pub uninstall_cmd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallResultPayload {
    pub success: bool,
    pub message: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "receivedSize", skip_serializing_if = "Option::is_none")]
    pub received_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UninstallResultPayload {
    pub success: bool,
    pub message: String,
    pub name: String,
}

/// Announces an incoming file transfer and the arguments the agent should
/// pass to the installer once the transfer completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileTransferStartPayload {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    #[serde(rename = "installArgs")]
    pub install_args: String,
}

/// Acknowledgement for `FILE_TRANSFER_START` (accept/reject) and for a
/// receive-side integrity failure at `FILE_TRANSFER_END`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileTransferAckPayload {
    pub success: bool,
    pub message: String,
    #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(rename = "receivedSize", skip_serializing_if = "Option::is_none")]
    pub received_size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_info_uses_wire_field_names() {
        let info = ClientInfo {
            computer_name: "WS-01".into(),
            ip_address: "10.0.0.5".into(),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
            os_version: "Linux 6.1".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"computerName\""));
        assert!(json.contains("\"ipAddress\""));
        assert!(json.contains("\"macAddress\""));
        assert!(json.contains("\"osVersion\""));
        let round_tripped: ClientInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped, info);
    }

    #[test]
    fn software_list_count_matches_len() {
        let list = SoftwareListPayload::new(vec![SoftwareEntry {
            name: "Widget".into(),
            version: "1.0".into(),
            publisher: "Acme".into(),
            install_date: "2026-01-01".into(),
            install_path: "C:\\Widget".into(),
            uninstall_cmd: "widget-uninstall.exe".into(),
        }]);
        assert_eq!(list.count, 1);
        let json = serde_json::to_string(&list).unwrap();
        let round_tripped: SoftwareListPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped, list);
    }

    #[test]
    fn file_transfer_ack_omits_optional_fields_when_absent() {
        let ack = FileTransferAckPayload {
            success: true,
            message: "ready".into(),
            file_path: None,
            received_size: None,
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert!(!json.contains("filePath"));
        assert!(!json.contains("receivedSize"));
    }
}
