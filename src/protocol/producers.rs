//! State→message producers (§4.3): the rules that bucket a printer's dirty
//! fields by outbound message kind, respect the interval gate and setup
//! gating, and reset only the stamps they consumed.
//!
//! Grounded in `core/_event_instrumentation.py`'s per-kind `build`/
//! `reset_changes` pair, reimplemented here as a fixed sequence of builder
//! functions rather than a registered map — Rust has no convenient runtime
//! reflection over the state tree, so the "compile-time map" option named
//! in §4.2 is the natural fit.

use std::collections::HashMap;

use super::messages::{
    AmbientData, ClientMsg, CpuInfoData, FileProgressData, FirmwareData, FirmwareWarningData,
    JobInfoData, MachineDataData, MaterialDataData, MaterialEntry, StateChangeData,
    TemperaturesData, ToolData,
};
use crate::state::intervals::{DispatchMode, IntervalKind};
use crate::state::printer::PrinterState;
use crate::state::Stamped;

/// Context a consume pass needs beyond the state tree itself.
pub struct ConsumeContext {
    /// A pending client (`id == 0`) may only emit setup-allowed kinds (§7).
    pub in_setup: bool,
    /// Set by a `refresh_material_data` demand (§4.3, §12): forces every
    /// material to be treated as dirty before this consume pass runs.
    pub force_material_refresh: bool,
    /// The job id the client last learned from a `file` demand; surfaced
    /// on the next `file_progress` message (§4.3's FileProgressMsg note).
    pub current_job_id: Option<i64>,
}

const SETUP_ALLOWED_PRODUCER_KINDS: &[&str] = &["machine_data", "state_change"];

fn allowed_in_setup(kind: &str, ctx: &ConsumeContext) -> bool {
    !ctx.in_setup || SETUP_ALLOWED_PRODUCER_KINDS.contains(&kind)
}

/// Runs one consume pass: snapshots the changeset, builds every applicable
/// outbound message, and resets exactly the stamps it used. Messages are
/// returned in the fixed registration order required by §5's ordering
/// guarantee.
///
/// Setup gating (§4.3 point 3, §7) is checked *before* a disallowed kind's
/// builder runs, not as a filter over the result: a `build_*` function
/// resets the stamps it consumes as a side effect, so building-then-dropping
/// a disallowed kind would silently discard that state change for good —
/// the field would no longer be dirty once `in_setup` later flips false.
pub fn consume(state: &mut PrinterState, ctx: &ConsumeContext) -> Vec<ClientMsg> {
    if ctx.force_material_refresh {
        state.refresh_all_materials();
    }

    let mut out = Vec::new();

    if allowed_in_setup("tool", ctx) {
        if let Some(msg) = build_tool(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("state_change", ctx) {
        if let Some(msg) = build_state_change(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("machine_data", ctx) {
        if let Some(msg) = build_machine_data(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("ambient", ctx) {
        if let Some(msg) = build_ambient(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("temps", ctx) {
        if let Some(msg) = build_temps(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("cpu_info", ctx) {
        if let Some(msg) = build_cpu_info(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("firmware", ctx) {
        if let Some(msg) = build_firmware(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("firmware_warning", ctx) {
        if let Some(msg) = build_firmware_warning(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("job_info", ctx) {
        if let Some(msg) = build_job_info(state) {
            out.push(msg);
        }
    }
    if allowed_in_setup("file_progress", ctx) {
        if let Some(msg) = build_file_progress(state, ctx.current_job_id) {
            out.push(msg);
        }
    }
    if allowed_in_setup("material_data", ctx) {
        if let Some(msg) = build_material_data(state, ctx.force_material_refresh) {
            out.push(msg);
        }
    }

    out
}

fn build_tool(state: &mut PrinterState) -> Option<ClientMsg> {
    if !state.active_tool.is_dirty() {
        return None;
    }
    let stamp = state.active_tool.stamp();
    let data = ToolData {
        new: *state.active_tool.get(),
    };
    state.active_tool.reset_changes(stamp);
    Some(ClientMsg::Tool(data))
}

fn build_state_change(state: &mut PrinterState) -> Option<ClientMsg> {
    if !state.status.is_dirty() {
        return None;
    }
    let stamp = state.status.stamp();
    let data = StateChangeData {
        new: format!("{:?}", state.status.get()).to_lowercase(),
    };
    state.status.reset_changes(stamp);
    Some(ClientMsg::StateChange(data))
}

fn build_ambient(state: &mut PrinterState) -> Option<ClientMsg> {
    if !state.ambient_temperature.is_dirty() {
        return None;
    }
    let stamp = state.ambient_temperature.stamp();
    let data = AmbientData {
        ambient: *state.ambient_temperature.get(),
    };
    state.ambient_temperature.reset_changes(stamp);
    Some(ClientMsg::Ambient(data))
}

/// Bucketed by `bed`/`tool{i}` (§4.3): `dispatchMode` picks `temps_target`
/// when any target field was just set, which also forces dispatch
/// regardless of the interval gate.
fn build_temps(state: &mut PrinterState) -> Option<ClientMsg> {
    let mut tools: HashMap<String, [Option<f64>; 2]> = HashMap::new();
    let mut bucket_max = 0u64;
    let mut target_touched = false;

    if state.bed_temperature.max_stamp() != 0 {
        bucket_max = bucket_max.max(state.bed_temperature.max_stamp());
        target_touched |= state.bed_temperature.target.is_dirty();
        tools.insert(
            "bed".to_string(),
            [*state.bed_temperature.actual.get(), *state.bed_temperature.target.get()],
        );
    }

    for (i, tool) in state.tool_temperatures().iter().enumerate() {
        if tool.max_stamp() != 0 {
            bucket_max = bucket_max.max(tool.max_stamp());
            target_touched |= tool.target.is_dirty();
            tools.insert(format!("tool{i}"), [*tool.actual.get(), *tool.target.get()]);
        }
    }

    if tools.is_empty() {
        return None;
    }

    let kind = if target_touched {
        IntervalKind::TempsTarget
    } else {
        IntervalKind::Temps
    };

    if !target_touched && state.intervals.dispatch_mode(kind) != DispatchMode::Dispatch {
        return None;
    }
    if !target_touched {
        state.intervals.use_interval(kind);
    }

    state.bed_temperature.reset_changes(bucket_max);
    for tool in state.tool_temperatures_mut() {
        tool.reset_changes(bucket_max);
    }

    Some(ClientMsg::Temps(TemperaturesData { tools }))
}

fn build_cpu_info(state: &mut PrinterState) -> Option<ClientMsg> {
    let bucket_max = state.cpu_info.max_stamp();
    if bucket_max == 0 {
        return None;
    }
    if state.intervals.dispatch_mode(IntervalKind::Cpu) != DispatchMode::Dispatch {
        return None;
    }
    state.intervals.use_interval(IntervalKind::Cpu);

    let data = CpuInfoData {
        usage: if state.cpu_info.usage.is_dirty() { *state.cpu_info.usage.get() } else { None },
        memory: if state.cpu_info.memory.is_dirty() { *state.cpu_info.memory.get() } else { None },
        flags: if state.cpu_info.flags.is_dirty() { state.cpu_info.flags.get().clone() } else { None },
    };
    state.cpu_info.reset_changes(bucket_max);
    Some(ClientMsg::CpuInfo(data))
}

/// Host/API/OS metadata (§3 `info`): each field is included only if it was
/// individually touched since the last consume.
fn build_machine_data(state: &mut PrinterState) -> Option<ClientMsg> {
    let bucket_max = state.info.max_stamp();
    if bucket_max == 0 {
        return None;
    }

    let info = &state.info;
    let data = MachineDataData {
        ui: info.ui.is_dirty().then(|| info.ui.get().clone()).flatten(),
        ui_version: info.ui_version.is_dirty().then(|| info.ui_version.get().clone()).flatten(),
        api: info.api.is_dirty().then(|| info.api.get().clone()).flatten(),
        api_version: info.api_version.is_dirty().then(|| info.api_version.get().clone()).flatten(),
        sp_version: info.sp_version.is_dirty().then(|| info.sp_version.get().clone()).flatten(),
        os: info.os.is_dirty().then(|| info.os.get().clone()).flatten(),
        python_version: info.python_version.is_dirty().then(|| info.python_version.get().clone()).flatten(),
        is_ethernet: info.is_ethernet.is_dirty().then(|| *info.is_ethernet.get()).flatten(),
        local_ip: info.local_ip.is_dirty().then(|| info.local_ip.get().clone()).flatten(),
        hostname: info.hostname.is_dirty().then(|| info.hostname.get().clone()).flatten(),
        mac: info.mac.is_dirty().then(|| info.mac.get().clone()).flatten(),
        core_count: info.core_count.is_dirty().then(|| *info.core_count.get()).flatten(),
        total_memory: info.total_memory.is_dirty().then(|| *info.total_memory.get()).flatten(),
    };

    state.info.reset_changes(bucket_max);
    Some(ClientMsg::MachineData(data))
}

/// Nested `fw`/`fw_<field>` map per §4.3's FirmwareMsg note.
fn build_firmware(state: &mut PrinterState) -> Option<ClientMsg> {
    let bucket_max = state.firmware.max_stamp();
    if bucket_max == 0 {
        return None;
    }
    let mut fields = HashMap::new();
    if state.firmware.name.is_dirty() {
        if let Some(name) = state.firmware.name.get() {
            fields.insert("fw".to_string(), name.clone());
        }
    }
    if state.firmware.version.is_dirty() {
        if let Some(version) = state.firmware.version.get() {
            fields.insert("fw_version".to_string(), version.clone());
        }
    }
    state.firmware.reset_changes(bucket_max);
    Some(ClientMsg::Firmware(FirmwareData { fields }))
}

fn build_firmware_warning(state: &mut PrinterState) -> Option<ClientMsg> {
    let bucket_max = state.firmware_warning.max_stamp();
    if bucket_max == 0 {
        return None;
    }
    let unsafe_firmware = (*state.firmware_warning.unsafe_firmware.get()).unwrap_or(false);
    state.firmware_warning.reset_changes(bucket_max);
    Some(ClientMsg::FirmwareWarning(FirmwareWarningData { unsafe_firmware }))
}

/// Respects the `job` interval but forces dispatch when an exclusive
/// lifecycle signal changed (§4.3).
fn build_job_info(state: &mut PrinterState) -> Option<ClientMsg> {
    let bucket_max = state.job_info.max_stamp();
    if bucket_max == 0 {
        return None;
    }

    let forced = state.job_info.lifecycle_changed();
    if !forced && state.intervals.dispatch_mode(IntervalKind::Job) != DispatchMode::Dispatch {
        return None;
    }
    if !forced {
        state.intervals.use_interval(IntervalKind::Job);
    }

    let data = JobInfoData {
        started: state.job_info.started_dirty().then(|| state.job_info.started()),
        finished: state.job_info.finished_dirty().then(|| state.job_info.finished()),
        cancelled: state.job_info.cancelled_dirty().then(|| state.job_info.cancelled()),
        failed: state.job_info.failed_dirty().then(|| state.job_info.failed()),
        progress: if state.job_info.progress.is_dirty() {
            state.job_info.progress.get().map(|p| p.round())
        } else {
            None
        },
        filename: if state.job_info.filename.is_dirty() {
            state.job_info.filename.get().clone()
        } else {
            None
        },
    };

    state.job_info.reset_changes(bucket_max);
    Some(ClientMsg::JobInfo(data))
}

/// `percent` only in `downloading|started`; `message` only in `error`;
/// `job_id` is drawn from the client, not the state tree, if present (§4.3).
fn build_file_progress(state: &mut PrinterState, current_job_id: Option<i64>) -> Option<ClientMsg> {
    let bucket_max = state.file_progress.max_stamp();
    if bucket_max == 0 {
        return None;
    }
    let progress_state = state.file_progress.state.get().clone().unwrap_or_default();
    let percent = matches!(progress_state.as_str(), "downloading" | "started")
        .then(|| *state.file_progress.percent.get())
        .flatten();
    let message = (progress_state == "error")
        .then(|| state.file_progress.message.get().clone())
        .flatten();

    state.file_progress.reset_changes(bucket_max);
    Some(ClientMsg::FileProgress(FileProgressData {
        state: progress_state,
        percent,
        message,
        job_id: current_job_id,
    }))
}

/// Either a full refresh (all materials, triggered by `refresh_material_
/// data`, §12) or a delta over changed entries only.
fn build_material_data(state: &mut PrinterState, force_refresh: bool) -> Option<ClientMsg> {
    let bucket_max = crate::state::max_stamp_of_list(state.materials());
    if bucket_max == 0 && !force_refresh {
        return None;
    }

    let materials: Vec<MaterialEntry> = state
        .materials()
        .iter()
        .filter(|m| force_refresh || m.max_stamp() != 0)
        .map(|m| MaterialEntry {
            ext: m.ext,
            r#type: m.material_type.get().clone(),
            color: m.color.get().clone(),
        })
        .collect();

    if materials.is_empty() {
        return None;
    }

    crate::state::reset_list(state.materials_mut(), bucket_max);
    Some(ClientMsg::MaterialData(MaterialDataData { materials }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateCtx;

    fn ctx() -> ConsumeContext {
        ConsumeContext {
            in_setup: false,
            force_material_refresh: false,
            current_job_id: None,
        }
    }

    #[test]
    fn tool_change_yields_single_message() {
        let mut state = PrinterState::new(StateCtx::new());
        state.active_tool.set(1);
        let out = consume(&mut state, &ctx());
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], ClientMsg::Tool(ToolData { new: 1 })));

        let out_again = consume(&mut state, &ctx());
        assert!(out_again.is_empty());
    }

    #[test]
    fn temps_bucket_includes_only_dirty_tools() {
        let mut state = PrinterState::new(StateCtx::new());
        state.set_nozzle_count(2);
        state.tool_temperatures_mut()[0].actual.set(Some(200.0));
        state.tool_temperatures_mut()[0].target.set(Some(250.0));

        let out = consume(&mut state, &ctx());
        let temps = out.iter().find_map(|m| match m {
            ClientMsg::Temps(data) => Some(data),
            _ => None,
        });
        let temps = temps.expect("expected a temps message");
        assert!(temps.tools.contains_key("tool0"));
        assert!(!temps.tools.contains_key("tool1"));
    }

    #[test]
    fn job_lifecycle_change_forces_dispatch_despite_interval() {
        let mut state = PrinterState::new(StateCtx::new());
        state.intervals.use_interval(IntervalKind::Job);
        state.job_info.set_started(true);

        let out = consume(&mut state, &ctx());
        assert!(out.iter().any(|m| matches!(m, ClientMsg::JobInfo(_))));
    }

    #[test]
    fn machine_data_includes_only_dirty_fields() {
        let mut state = PrinterState::new(StateCtx::new());
        state.info.os.set(Some("linux".to_string()));

        let out = consume(&mut state, &ctx());
        let data = out.iter().find_map(|m| match m {
            ClientMsg::MachineData(data) => Some(data),
            _ => None,
        });
        let data = data.expect("expected a machine_data message");
        assert_eq!(data.os.as_deref(), Some("linux"));
        assert!(data.ui.is_none());
    }

    #[test]
    fn reconnect_forces_machine_data_and_firmware_resend() {
        let mut state = PrinterState::new(StateCtx::new());
        state.info.os.set(Some("linux".to_string()));
        state.firmware.name.set(Some("marlin".to_string()));
        let _ = consume(&mut state, &ctx());

        state.mark_common_fields_as_changed();
        let out = consume(&mut state, &ctx());
        assert!(out.iter().any(|m| matches!(m, ClientMsg::MachineData(_))));
        assert!(out.iter().any(|m| matches!(m, ClientMsg::Firmware(_))));
        assert!(out.iter().any(|m| matches!(m, ClientMsg::StateChange(_))));
    }

    #[test]
    fn setup_gating_drops_disallowed_kinds() {
        let mut state = PrinterState::new(StateCtx::new());
        state.active_tool.set(1);
        let out = consume(
            &mut state,
            &ConsumeContext {
                in_setup: true,
                force_material_refresh: false,
                current_job_id: None,
            },
        );
        assert!(out.is_empty());
        // The disallowed `tool` kind must not have been built-and-reset
        // under the hood: the change has to survive until setup ends.
        assert!(state.active_tool.is_dirty());
    }

    #[test]
    fn setup_gated_change_is_emitted_once_setup_ends() {
        let mut state = PrinterState::new(StateCtx::new());
        state.active_tool.set(1);
        let _ = consume(
            &mut state,
            &ConsumeContext {
                in_setup: true,
                force_material_refresh: false,
                current_job_id: None,
            },
        );

        let out = consume(&mut state, &ctx());
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], ClientMsg::Tool(ToolData { new: 1 })));
    }
}
