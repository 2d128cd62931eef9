//! `ServerMsg` / `ClientMsg`: the two tagged-union envelopes (§3, §6).
//! Each variant serializes as `{"type": "<kind>", "data": {...}}` via serde's
//! adjacently-tagged representation, which gives the same "discriminator
//! plus per-kind payload" shape as the original's `RootModel` union without
//! hand-rolled validation (§9).
//!
//! Grounded in `core/ws_protocol/messages.py`'s `ServerMsgType`/
//! `ClientMsgType` enums; payload fields are trimmed to what the producer
//! rules in §4.3 and the demand handling in §4.4/§7 actually consume.

use serde::{Deserialize, Serialize};

use super::demand::Demand;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTokenData {
    pub token: String,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub no_exist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedData {
    #[serde(default)]
    pub intervals: std::collections::HashMap<String, u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub in_setup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteSetupData {
    pub printer_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalChangeData {
    #[serde(flatten)]
    pub intervals: std::collections::HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterSettingsData {
    #[serde(default)]
    pub has_psu: Option<bool>,
    #[serde(default)]
    pub has_filament_sensor: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPrinterAddedData {
    pub unique_id: String,
    pub status: bool,
    #[serde(default)]
    pub pid: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPrinterRemovedData {
    pub unique_id: String,
}

/// Messages the server sends down the socket (§3). `Demand` carries its own
/// `demand` discriminator nested inside `data` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMsg {
    Error(ErrorData),
    NewToken(NewTokenData),
    Connected(ConnectedData),
    CompleteSetup(CompleteSetupData),
    IntervalChange(IntervalChangeData),
    Pong,
    StreamReceived,
    PrinterSettings(PrinterSettingsData),
    AddConnection(MultiPrinterAddedData),
    RemoveConnection(MultiPrinterRemovedData),
    Demand(Demand),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddConnectionData {
    pub unique_id: String,
    #[serde(default)]
    pub pid: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveConnectionData {
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyData {
    pub ping: i64,
    pub pong: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolData {
    pub new: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateChangeData {
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AmbientData {
    #[serde(default)]
    pub ambient: Option<f64>,
}

/// `[actual, target]` pairs per tool, plus an optional `bed` entry (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemperaturesData {
    #[serde(flatten)]
    pub tools: std::collections::HashMap<String, [Option<f64>; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpuInfoData {
    #[serde(default)]
    pub usage: Option<f64>,
    #[serde(default)]
    pub memory: Option<f64>,
    #[serde(default)]
    pub flags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PsuData {
    pub on: bool,
}

/// Host/API/OS metadata (§3 `info`); only the fields that actually changed
/// since the last consume are present (§4.3 point 3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MachineDataData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ethernet: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_memory: Option<i64>,
}

/// Nested `fw`/`fw_<field>` map (§4.3 FirmwareMsg note).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FirmwareData {
    #[serde(flatten)]
    pub fields: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FirmwareWarningData {
    pub unsafe_firmware: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebcamStatusData {
    pub connected: bool,
}

/// Only non-`None` fields are present, and `percent`/`message` are gated by
/// the current file-progress state (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobInfoData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileProgressData {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilamentSensorData {
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaterialEntry {
    pub ext: usize,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaterialDataData {
    pub materials: Vec<MaterialEntry>,
}

/// Messages the client sends up the socket (§3). Variants not yet needed by
/// the producer layer (`stream`, `webcam`, `printer_error`, plugin/update
/// reporting) are modeled with an opaque JSON payload since their shape is
/// owned by collaborators out of scope here (§1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMsg {
    AddConnection(AddConnectionData),
    RemoveConnection(RemoveConnectionData),
    Ping,
    Keepalive,
    Latency(LatencyData),
    Tool(ToolData),
    StateChange(StateChangeData),
    Ambient(AmbientData),
    Temps(TemperaturesData),
    CpuInfo(CpuInfoData),
    Psu(PsuData),
    MachineData(MachineDataData),
    Firmware(FirmwareData),
    FirmwareWarning(FirmwareWarningData),
    WebcamStatus(WebcamStatusData),
    JobInfo(JobInfoData),
    FileProgress(FileProgressData),
    FilamentSensor(FilamentSensorData),
    MaterialData(MaterialDataData),
    Shutdown,
}

impl ClientMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMsg::AddConnection(_) => "add_connection",
            ClientMsg::RemoveConnection(_) => "remove_connection",
            ClientMsg::Ping => "ping",
            ClientMsg::Keepalive => "keepalive",
            ClientMsg::Latency(_) => "latency",
            ClientMsg::Tool(_) => "tool",
            ClientMsg::StateChange(_) => "state_change",
            ClientMsg::Ambient(_) => "ambient",
            ClientMsg::Temps(_) => "temps",
            ClientMsg::CpuInfo(_) => "cpu_info",
            ClientMsg::Psu(_) => "psu",
            ClientMsg::MachineData(_) => "machine_data",
            ClientMsg::Firmware(_) => "firmware",
            ClientMsg::FirmwareWarning(_) => "firmware_warning",
            ClientMsg::WebcamStatus(_) => "webcam_status",
            ClientMsg::JobInfo(_) => "job_info",
            ClientMsg::FileProgress(_) => "file_progress",
            ClientMsg::FilamentSensor(_) => "filament_sensor",
            ClientMsg::MaterialData(_) => "material_data",
            ClientMsg::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ping_serializes_without_data() {
        let json = serde_json::to_string(&ClientMsg::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn server_demand_round_trips_through_the_demand_discriminator() {
        let json = r#"{"type":"demand","data":{"demand":"pause"}}"#;
        let msg: ServerMsg = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMsg::Demand(Demand::Pause)));
    }

    #[test]
    fn job_info_omits_none_fields() {
        let data = JobInfoData {
            started: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"started":true}"#);
    }
}
