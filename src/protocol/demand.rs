//! The `demand` tagged union (§3): a server→client command, nested inside
//! `ServerMsg::Demand`'s `data` with its own `demand` discriminator (§6).
//!
//! Grounded in `core/ws_protocol/messages.py`'s `DemandMsgType` /
//! `*DemandData` classes. Demands whose payload is owned by an external
//! collaborator (§1: camera capture, file download, gcode, plugin install)
//! carry an opaque JSON blob rather than a fully-typed struct — the core
//! only needs to recognize and route them, not interpret their contents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GcodeDemandData {
    pub list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileDemandData {
    pub url: String,
    #[serde(default)]
    pub start_print: bool,
    /// The job id this download belongs to, surfaced back to the server on
    /// the next `file_progress` message (§4.3's FileProgressMsg note).
    #[serde(default)]
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SetPrinterProfileDemandData {
    pub profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SetMaterialDataDemandData {
    pub ext: usize,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TerminalDemandData {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebcamSettingsUpdatedDemandData {
    #[serde(default)]
    pub flip_h: Option<bool>,
    #[serde(default)]
    pub flip_v: Option<bool>,
}

/// A server-issued command (§3, §4.3, §7). Unit variants carry no payload;
/// `#[serde(other)]`-free exhaustiveness is intentional — an unrecognized
/// `demand` value fails deserialization rather than being silently ignored,
/// surfacing as a malformed-message error (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "demand", content = "data", rename_all = "snake_case")]
pub enum Demand {
    Pause,
    Resume,
    Cancel,
    Terminal(TerminalDemandData),
    Gcode(GcodeDemandData),
    TestWebcam,
    WebcamSnapshot,
    File(FileDemandData),
    StartPrint,
    ConnectPrinter,
    DisconnectPrinter,
    SystemRestart,
    SystemShutdown,
    ApiRestart,
    ApiShutdown,
    Update(Value),
    PluginInstall(Value),
    PluginUninstall(Value),
    WebcamSettingsUpdated(WebcamSettingsUpdatedDemandData),
    StreamOn,
    StreamOff,
    SetPrinterProfile(SetPrinterProfileDemandData),
    SetMaterialData(SetMaterialDataDemandData),
    RefreshMaterialData,
    GetGcodeScriptBackups,
    HasGcodeChanges,
    PsuKeepalive,
    PsuOn,
    PsuOff,
    DisableWebsockets,
    GotoWsProd,
    GotoWsTest,
    SendLogs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_demand_round_trips() {
        let json = serde_json::to_string(&Demand::Pause).unwrap();
        assert_eq!(json, r#"{"demand":"pause"}"#);
        let back: Demand = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Demand::Pause));
    }

    #[test]
    fn refresh_material_data_has_no_payload() {
        let json = r#"{"demand":"refresh_material_data"}"#;
        let demand: Demand = serde_json::from_str(json).unwrap();
        assert!(matches!(demand, Demand::RefreshMaterialData));
    }
}
