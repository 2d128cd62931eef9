//! The reactive printer state tree (§3). One [`PrinterState`] per client;
//! every leaf is `Tracked<T>` (or `Signal<T>` for `job_info`'s lifecycle
//! flags) so the producer layer (`protocol::producers`) can snapshot exactly
//! what changed since the last consume.
//!
//! Grounded in `core/state/printer.py` / `core/state/models.py` for the node
//! shapes, trimmed to the fields the message producers in §4.3 actually
//! read — the original carries some physical-machine-info fields that are a
//! true external collaborator here (§1 Non-goals) and are not ported.

use super::intervals::Intervals;
use super::job_info::JobInfo;
use super::{changeset_of_list, max_stamp_of_list, reset_list, Changeset, Stamped, StateCtx, Tracked};

#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub enum PrinterStatus {
    #[default]
    Offline,
    Operational,
    Printing,
    Paused,
    Error,
    Cancelling,
    Pausing,
}

/// One tool's temperature pair, `nozzle == index` into `PrinterState::nozzles`
/// is enforced by [`PrinterState::set_nozzle_count`].
pub struct ToolTemperature {
    pub actual: Tracked<Option<f64>>,
    pub target: Tracked<Option<f64>>,
}

impl ToolTemperature {
    fn new(ctx: StateCtx) -> Self {
        Self {
            actual: Tracked::new(ctx.clone()),
            target: Tracked::new(ctx),
        }
    }
}

impl Stamped for ToolTemperature {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        self.actual.changeset(&format!("{prefix}.actual"), out);
        self.target.changeset(&format!("{prefix}.target"), out);
    }
    fn reset_changes(&mut self, max_stamp: u64) {
        self.actual.reset_changes(max_stamp);
        self.target.reset_changes(max_stamp);
    }
    fn max_stamp(&self) -> u64 {
        self.actual.max_stamp().max(self.target.max_stamp())
    }
}

/// A nozzle's physical descriptor, `nozzle == index`.
pub struct Nozzle {
    pub nozzle: usize,
    pub diameter: Tracked<Option<f64>>,
}

impl Stamped for Nozzle {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        self.diameter.changeset(&format!("{prefix}.diameter"), out);
    }
    fn reset_changes(&mut self, max_stamp: u64) {
        self.diameter.reset_changes(max_stamp);
    }
    fn max_stamp(&self) -> u64 {
        self.diameter.max_stamp()
    }
}

/// A material slot, `ext == index`.
pub struct Material {
    pub ext: usize,
    pub material_type: Tracked<Option<String>>,
    pub color: Tracked<Option<String>>,
}

impl Stamped for Material {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        self.material_type.changeset(&format!("{prefix}.type"), out);
        self.color.changeset(&format!("{prefix}.color"), out);
    }
    fn reset_changes(&mut self, max_stamp: u64) {
        self.material_type.reset_changes(max_stamp);
        self.color.reset_changes(max_stamp);
    }
    fn max_stamp(&self) -> u64 {
        self.material_type.max_stamp().max(self.color.max_stamp())
    }
}

#[derive(Default)]
pub struct CpuInfo {
    pub usage: Tracked<Option<f64>>,
    pub memory: Tracked<Option<f64>>,
    pub flags: Tracked<Option<String>>,
}

#[derive(Default)]
pub struct PsuInfo {
    pub on: Tracked<Option<bool>>,
}

#[derive(Default)]
pub struct WebcamInfo {
    pub connected: Tracked<Option<bool>>,
}

#[derive(Default)]
pub struct FileProgressState {
    pub state: Tracked<Option<String>>,
    pub percent: Tracked<Option<f64>>,
    pub message: Tracked<Option<String>>,
}

#[derive(Default)]
pub struct Latency {
    pub pong: Tracked<Option<i64>>,
}

/// Host/API/OS metadata (§3 `info`), reported to the server as `machine_data`.
#[derive(Default)]
pub struct MachineInfo {
    pub ui: Tracked<Option<String>>,
    pub ui_version: Tracked<Option<String>>,
    pub api: Tracked<Option<String>>,
    pub api_version: Tracked<Option<String>>,
    pub sp_version: Tracked<Option<String>>,
    pub os: Tracked<Option<String>>,
    pub python_version: Tracked<Option<String>>,
    pub is_ethernet: Tracked<Option<bool>>,
    pub local_ip: Tracked<Option<String>>,
    pub hostname: Tracked<Option<String>>,
    pub mac: Tracked<Option<String>>,
    pub core_count: Tracked<Option<i64>>,
    pub total_memory: Tracked<Option<i64>>,
}

#[derive(Default)]
pub struct Firmware {
    pub name: Tracked<Option<String>>,
    pub version: Tracked<Option<String>>,
}

#[derive(Default)]
pub struct FirmwareWarning {
    pub unsafe_firmware: Tracked<Option<bool>>,
}

#[derive(Default)]
pub struct PrinterSettings {
    pub has_psu: Tracked<Option<bool>>,
    pub has_filament_sensor: Tracked<Option<bool>>,
}

#[derive(Default)]
pub struct WebcamSettings {
    pub flip_h: Tracked<Option<bool>>,
    pub flip_v: Tracked<Option<bool>>,
}

#[derive(Default)]
pub struct MmsLayout {
    pub active_extruder: Tracked<Option<i64>>,
}

macro_rules! impl_stamped_for_record {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl Stamped for $ty {
            fn changeset(&self, prefix: &str, out: &mut Changeset) {
                $(self.$field.changeset(&format!("{prefix}.{}", stringify!($field)), out);)+
            }
            fn reset_changes(&mut self, max_stamp: u64) {
                $(self.$field.reset_changes(max_stamp);)+
            }
            fn max_stamp(&self) -> u64 {
                [$(self.$field.max_stamp()),+].into_iter().max().unwrap_or(0)
            }
        }
    };
}

impl_stamped_for_record!(CpuInfo { usage, memory, flags });
impl_stamped_for_record!(PsuInfo { on });
impl_stamped_for_record!(WebcamInfo { connected });
impl_stamped_for_record!(FileProgressState { state, percent, message });
impl_stamped_for_record!(Latency { pong });
impl_stamped_for_record!(MachineInfo {
    ui,
    ui_version,
    api,
    api_version,
    sp_version,
    os,
    python_version,
    is_ethernet,
    local_ip,
    hostname,
    mac,
    core_count,
    total_memory,
});
impl_stamped_for_record!(Firmware { name, version });
impl_stamped_for_record!(FirmwareWarning { unsafe_firmware });
impl_stamped_for_record!(PrinterSettings { has_psu, has_filament_sensor });
impl_stamped_for_record!(WebcamSettings { flip_h, flip_v });
impl_stamped_for_record!(MmsLayout { active_extruder });

/// The full reactive printer tree (§3). Built once per client with its own
/// [`StateCtx`]; `nozzle_count`/`material_count` default to 1 per the
/// invariant in §3 ("at least one of each").
pub struct PrinterState {
    ctx: StateCtx,

    pub status: Tracked<PrinterStatus>,
    pub active_tool: Tracked<i64>,
    nozzle_count: Tracked<u32>,
    material_count: Tracked<u32>,

    pub cpu_info: CpuInfo,
    pub job_info: JobInfo,
    pub psu_info: PsuInfo,
    pub webcam_info: WebcamInfo,
    pub file_progress: FileProgressState,
    pub latency: Latency,
    pub info: MachineInfo,
    pub firmware: Firmware,
    pub firmware_warning: FirmwareWarning,
    pub bed_temperature: ToolTemperature,
    pub ambient_temperature: Tracked<Option<f64>>,
    pub settings: PrinterSettings,
    pub webcam_settings: WebcamSettings,
    pub mms_layout: MmsLayout,
    pub intervals: Intervals,

    tool_temperatures: Vec<ToolTemperature>,
    nozzles: Vec<Nozzle>,
    materials: Vec<Material>,
}

impl PrinterState {
    pub fn new(ctx: StateCtx) -> Self {
        let mut state = Self {
            status: Tracked::new(ctx.clone()),
            active_tool: Tracked::new(ctx.clone()),
            nozzle_count: Tracked::with_value(1, ctx.clone()),
            material_count: Tracked::with_value(1, ctx.clone()),

            cpu_info: CpuInfo::default_with(ctx.clone()),
            job_info: JobInfo::new(ctx.clone()),
            psu_info: PsuInfo::default_with(ctx.clone()),
            webcam_info: WebcamInfo::default_with(ctx.clone()),
            file_progress: FileProgressState::default_with(ctx.clone()),
            latency: Latency::default_with(ctx.clone()),
            info: MachineInfo::default_with(ctx.clone()),
            firmware: Firmware::default_with(ctx.clone()),
            firmware_warning: FirmwareWarning::default_with(ctx.clone()),
            bed_temperature: ToolTemperature::new(ctx.clone()),
            ambient_temperature: Tracked::new(ctx.clone()),
            settings: PrinterSettings::default_with(ctx.clone()),
            webcam_settings: WebcamSettings::default_with(ctx.clone()),
            mms_layout: MmsLayout::default_with(ctx.clone()),
            intervals: Intervals::default(),

            tool_temperatures: Vec::new(),
            nozzles: Vec::new(),
            materials: Vec::new(),

            ctx,
        };
        state.set_nozzle_count(1);
        state.set_material_count(1);
        state
    }

    pub fn nozzle_count(&self) -> u32 {
        *self.nozzle_count.get()
    }

    pub fn material_count(&self) -> u32 {
        *self.material_count.get()
    }

    pub fn tool_temperatures(&self) -> &[ToolTemperature] {
        &self.tool_temperatures
    }

    pub fn tool_temperatures_mut(&mut self) -> &mut [ToolTemperature] {
        &mut self.tool_temperatures
    }

    pub fn nozzles(&self) -> &[Nozzle] {
        &self.nozzles
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut [Material] {
        &mut self.materials
    }

    /// Resizes `tool_temperatures`/`nozzles` to `count`, clamped to at least
    /// 1 (§3, §8: `nozzle_count >= 1`). Growth preserves the existing prefix
    /// and constructs new entries with their correct `nozzle == index`
    /// self-reference (§4.2).
    pub fn set_nozzle_count(&mut self, count: u32) {
        let count = count.max(1);
        if !self.nozzle_count.set(count) && self.tool_temperatures.len() == count as usize {
            return;
        }
        let count = count as usize;
        self.tool_temperatures
            .resize_with(count, || ToolTemperature::new(self.ctx.clone()));
        while self.nozzles.len() < count {
            let index = self.nozzles.len();
            self.nozzles.push(Nozzle {
                nozzle: index,
                diameter: Tracked::new(self.ctx.clone()),
            });
        }
        self.nozzles.truncate(count);
    }

    /// Resizes `materials` to `count`, clamped to at least 1, preserving
    /// prefix membership and `ext == index` (§3, §8).
    pub fn set_material_count(&mut self, count: u32) {
        let count = count.max(1);
        self.material_count.set(count);
        let count = count as usize;
        while self.materials.len() < count {
            let index = self.materials.len();
            self.materials.push(Material {
                ext: index,
                material_type: Tracked::new(self.ctx.clone()),
                color: Tracked::new(self.ctx.clone()),
            });
        }
        self.materials.truncate(count);
    }

    /// Marks widely-observed fields dirty after a reconnect so the next
    /// consume re-emits `state_change`, `machine_data`, `firmware` at
    /// minimum (§8 scenario 6).
    pub fn mark_common_fields_as_changed(&mut self) {
        self.status.mark_dirty();
        self.firmware.name.mark_dirty();
        self.info.os.mark_dirty();
    }

    /// Marks all materials dirty, used by the `refresh_material_data` demand
    /// (§4.3, §12: treated as a full snapshot).
    pub fn refresh_all_materials(&mut self) {
        for material in &mut self.materials {
            material.material_type.mark_dirty();
        }
    }
}

trait DefaultWith {
    fn default_with(ctx: StateCtx) -> Self;
}

macro_rules! impl_default_with {
    ($ty:ty) => {
        impl DefaultWith for $ty {
            fn default_with(ctx: StateCtx) -> Self {
                let _ = &ctx;
                <$ty as Default>::default()
            }
        }
    };
}

impl_default_with!(CpuInfo);
impl_default_with!(PsuInfo);
impl_default_with!(WebcamInfo);
impl_default_with!(FileProgressState);
impl_default_with!(Latency);
impl_default_with!(MachineInfo);
impl_default_with!(Firmware);
impl_default_with!(FirmwareWarning);
impl_default_with!(PrinterSettings);
impl_default_with!(WebcamSettings);
impl_default_with!(MmsLayout);

impl Stamped for PrinterState {
    fn changeset(&self, prefix: &str, out: &mut Changeset) {
        self.status.changeset(&format!("{prefix}.status"), out);
        self.active_tool.changeset(&format!("{prefix}.active_tool"), out);
        self.nozzle_count.changeset(&format!("{prefix}.nozzle_count"), out);
        self.material_count.changeset(&format!("{prefix}.material_count"), out);

        self.cpu_info.changeset(&format!("{prefix}.cpu_info"), out);
        self.job_info.changeset(&format!("{prefix}.job_info"), out);
        self.psu_info.changeset(&format!("{prefix}.psu_info"), out);
        self.webcam_info.changeset(&format!("{prefix}.webcam_info"), out);
        self.file_progress.changeset(&format!("{prefix}.file_progress"), out);
        self.latency.changeset(&format!("{prefix}.latency"), out);
        self.info.changeset(&format!("{prefix}.info"), out);
        self.firmware.changeset(&format!("{prefix}.firmware"), out);
        self.firmware_warning
            .changeset(&format!("{prefix}.firmware_warning"), out);
        self.bed_temperature
            .changeset(&format!("{prefix}.bed_temperature"), out);
        self.ambient_temperature
            .changeset(&format!("{prefix}.ambient_temperature"), out);
        self.settings.changeset(&format!("{prefix}.settings"), out);
        self.webcam_settings
            .changeset(&format!("{prefix}.webcam_settings"), out);
        self.mms_layout.changeset(&format!("{prefix}.mms_layout"), out);

        changeset_of_list(&self.tool_temperatures, &format!("{prefix}.tool_temperatures"), out);
        changeset_of_list(&self.nozzles, &format!("{prefix}.nozzles"), out);
        changeset_of_list(&self.materials, &format!("{prefix}.materials"), out);
    }

    fn reset_changes(&mut self, max_stamp: u64) {
        self.status.reset_changes(max_stamp);
        self.active_tool.reset_changes(max_stamp);
        self.nozzle_count.reset_changes(max_stamp);
        self.material_count.reset_changes(max_stamp);

        self.cpu_info.reset_changes(max_stamp);
        self.job_info.reset_changes(max_stamp);
        self.psu_info.reset_changes(max_stamp);
        self.webcam_info.reset_changes(max_stamp);
        self.file_progress.reset_changes(max_stamp);
        self.latency.reset_changes(max_stamp);
        self.info.reset_changes(max_stamp);
        self.firmware.reset_changes(max_stamp);
        self.firmware_warning.reset_changes(max_stamp);
        self.bed_temperature.reset_changes(max_stamp);
        self.ambient_temperature.reset_changes(max_stamp);
        self.settings.reset_changes(max_stamp);
        self.webcam_settings.reset_changes(max_stamp);
        self.mms_layout.reset_changes(max_stamp);

        reset_list(&mut self.tool_temperatures, max_stamp);
        reset_list(&mut self.nozzles, max_stamp);
        reset_list(&mut self.materials, max_stamp);
    }

    fn max_stamp(&self) -> u64 {
        [
            self.status.max_stamp(),
            self.active_tool.max_stamp(),
            self.nozzle_count.max_stamp(),
            self.material_count.max_stamp(),
            self.cpu_info.max_stamp(),
            self.job_info.max_stamp(),
            self.psu_info.max_stamp(),
            self.webcam_info.max_stamp(),
            self.file_progress.max_stamp(),
            self.latency.max_stamp(),
            self.info.max_stamp(),
            self.firmware.max_stamp(),
            self.firmware_warning.max_stamp(),
            self.bed_temperature.max_stamp(),
            self.ambient_temperature.max_stamp(),
            self.settings.max_stamp(),
            self.webcam_settings.max_stamp(),
            self.mms_layout.max_stamp(),
            max_stamp_of_list(&self.tool_temperatures),
            max_stamp_of_list(&self.nozzles),
            max_stamp_of_list(&self.materials),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_temperatures_len_tracks_nozzle_count() {
        let mut state = PrinterState::new(StateCtx::new());
        state.set_nozzle_count(3);
        assert_eq!(state.tool_temperatures().len(), 3);
        assert_eq!(state.nozzles().len(), 3);
        for (i, nozzle) in state.nozzles().iter().enumerate() {
            assert_eq!(nozzle.nozzle, i);
        }
    }

    #[test]
    fn shrinking_nozzle_count_preserves_prefix() {
        let mut state = PrinterState::new(StateCtx::new());
        state.set_nozzle_count(3);
        state.tool_temperatures_mut()[1].actual.set(Some(200.0));
        state.set_nozzle_count(2);
        assert_eq!(state.tool_temperatures().len(), 2);
        assert_eq!(*state.tool_temperatures()[1].actual.get(), Some(200.0));
    }

    #[test]
    fn nozzle_count_cannot_go_below_one() {
        let mut state = PrinterState::new(StateCtx::new());
        state.set_nozzle_count(0);
        assert_eq!(state.nozzle_count(), 1);
        assert_eq!(state.tool_temperatures().len(), 1);
    }

    #[test]
    fn material_ext_tracks_index() {
        let mut state = PrinterState::new(StateCtx::new());
        state.set_material_count(4);
        for (i, material) in state.materials().iter().enumerate() {
            assert_eq!(material.ext, i);
        }
    }

    #[test]
    fn same_value_scalar_assignment_is_a_no_op() {
        let mut state = PrinterState::new(StateCtx::new());
        state.active_tool.set(0);
        assert!(!state.active_tool.is_dirty());
        state.active_tool.set(1);
        assert!(state.active_tool.is_dirty());
        let stamp = state.active_tool.stamp();
        state.active_tool.reset_changes(stamp);
        state.active_tool.set(1);
        assert!(!state.active_tool.is_dirty());
    }

    #[test]
    fn reset_changes_clears_exactly_up_to_bound() {
        let mut state = PrinterState::new(StateCtx::new());
        state.active_tool.set(2);
        state.tool_temperatures_mut()[0].actual.set(Some(10.0));
        let vmax = state.max_stamp();
        state.reset_changes(vmax);

        let mut out = Changeset::new();
        state.changeset("printer", &mut out);
        assert!(out.is_empty());
    }
}
