// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The shared hardware context.
//!
//! One instance is owned by the daemon entry point and passed explicitly to
//! the engine and its plugins. It is single-threaded by contract: all reads
//! and mutations happen on the daemon main loop.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use bitflags::bitflags;
use snafu::ensure;

use volumes::Inventory;

use crate::efivars::{DummyEfivars, Efivars, SystemEfivars};
use crate::esp::EspRegistry;
use crate::events::{ChangeEvent, ListenerHandle, Listeners};
use crate::fdt::{load_fdt, Fdt};
use crate::hwid::{DmiBackend, HwidBackend, HwidSetupFlags, Hwids};
use crate::pe::PeImage;
use crate::{EfivarsSpaceSnafu, Error, HwinfoNotLoadedSnafu, NoBackendSnafu, NoPluginsForSubsystemSnafu};

bitflags! {
    /// Behavioural flags on the context
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u64 {
        /// All devices are not updatable
        const SYSTEM_INHIBIT = 1 << 0;
        /// `load_hwinfo` has completed
        const LOADED_HWINFO = 1 << 1;
        /// Never mount volumes, usually for self tests
        const INHIBIT_VOLUME_MOUNT = 1 << 2;
        /// BitLocker full disk encryption detected
        const FDE_BITLOCKER = 1 << 3;
        /// snapd full disk encryption detected
        const FDE_SNAPD = 1 << 4;
        /// Skip the NVRAM free space requirement
        const IGNORE_EFIVARS_FREE_SPACE = 1 << 5;
    }
}

/// Sentinel for an unknown battery level or threshold, in percent
pub const BATTERY_LEVEL_INVALID: u32 = 101;

const QUIRKS_KEY_FLAGS: &str = "Flags";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Unknown,
    Ac,
    AcCharging,
    AcFullyCharged,
    Battery,
    BatteryDischarging,
    BatteryEmpty,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerState::Unknown => "unknown",
            PowerState::Ac => "ac",
            PowerState::AcCharging => "ac-charging",
            PowerState::AcFullyCharged => "ac-fully-charged",
            PowerState::Battery => "battery",
            PowerState::BatteryDischarging => "battery-discharging",
            PowerState::BatteryEmpty => "battery-empty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LidState {
    #[default]
    Unknown,
    Open,
    Closed,
}

impl fmt::Display for LidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LidState::Unknown => "unknown",
            LidState::Open => "open",
            LidState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayState::Unknown => "unknown",
            DisplayState::Connected => "connected",
            DisplayState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Machine enclosure, derived from the DMI chassis type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChassisKind {
    #[default]
    Unknown,
    Desktop,
    Portable,
    Laptop,
    Notebook,
    AllInOne,
    Tablet,
    Convertible,
    Detachable,
    Server,
    Other,
}

impl ChassisKind {
    /// Map a raw SMBIOS chassis type byte
    pub fn from_dmi(value: u8) -> Self {
        match value {
            0x02 => ChassisKind::Unknown,
            0x03..=0x07 => ChassisKind::Desktop,
            0x08 => ChassisKind::Portable,
            0x09 => ChassisKind::Laptop,
            0x0A | 0x0E => ChassisKind::Notebook,
            0x0D => ChassisKind::AllInOne,
            0x11 | 0x17 => ChassisKind::Server,
            0x1E => ChassisKind::Tablet,
            0x1F => ChassisKind::Convertible,
            0x20 => ChassisKind::Detachable,
            _ => ChassisKind::Other,
        }
    }
}

/// A registered firmware parser
pub trait Firmware: Any {
    fn parse(&mut self, data: &[u8]) -> Result<(), Error>;
}

struct FirmwareEntry {
    factory: Box<dyn Fn() -> Box<dyn Firmware>>,
    type_id: TypeId,
}

/// A device backend registered by the daemon, e.g. usb or udev
pub trait Backend: std::fmt::Debug {
    fn name(&self) -> &str;
}

/// Quirk database lookup, keyed by GUID and entry name
pub trait QuirkLookup {
    fn lookup(&self, guid: &str, key: &str) -> Option<String>;
}

struct NoQuirks;

impl QuirkLookup for NoQuirks {
    fn lookup(&self, _guid: &str, _key: &str) -> Option<String> {
        None
    }
}

pub struct Context {
    pub(crate) flags: ContextFlags,
    pub(crate) esp_location: Option<PathBuf>,
    pub(crate) inventory: Box<dyn Inventory>,
    pub(crate) efivars: Box<dyn Efivars>,
    pub(crate) esp_registry: RefCell<EspRegistry>,
    pub(crate) mount_base: PathBuf,

    power_state: PowerState,
    lid_state: LidState,
    display_state: DisplayState,
    battery_level: u32,
    battery_threshold: u32,
    chassis_kind: ChassisKind,

    udev_subsystems: BTreeMap<String, Vec<String>>,
    firmware_types: BTreeMap<String, FirmwareEntry>,
    runtime_versions: BTreeMap<String, String>,
    compile_versions: BTreeMap<String, String>,
    backends: Vec<Box<dyn Backend>>,
    data: BTreeMap<String, Rc<dyn Any>>,

    hwids: Hwids,
    hwid_flags: BTreeSet<String>,
    hwid_backends: Vec<Box<dyn HwidBackend>>,
    quirks: Box<dyn QuirkLookup>,
    fdt: RefCell<Option<Rc<Fdt>>>,

    change_listeners: Listeners<ChangeEvent>,
    security_listeners: Listeners<()>,
    housekeeping_listeners: Listeners<()>,
}

impl Context {
    /// Create a context over explicit collaborators
    pub fn new(inventory: Box<dyn Inventory>, efivars: Box<dyn Efivars>) -> Self {
        let esp_override = std::env::var_os("FWUPD_UEFI_ESP_PATH").map(PathBuf::from);
        Self {
            flags: ContextFlags::empty(),
            esp_location: None,
            inventory,
            efivars,
            esp_registry: RefCell::new(EspRegistry::new(esp_override)),
            mount_base: std::env::temp_dir().join("hwcontext"),
            power_state: PowerState::default(),
            lid_state: LidState::default(),
            display_state: DisplayState::default(),
            battery_level: BATTERY_LEVEL_INVALID,
            battery_threshold: BATTERY_LEVEL_INVALID,
            chassis_kind: ChassisKind::default(),
            udev_subsystems: BTreeMap::new(),
            firmware_types: BTreeMap::new(),
            runtime_versions: BTreeMap::new(),
            compile_versions: BTreeMap::new(),
            backends: vec![],
            data: BTreeMap::new(),
            hwids: Hwids::default(),
            hwid_flags: BTreeSet::new(),
            hwid_backends: vec![],
            quirks: Box::new(NoQuirks),
            fdt: RefCell::new(None),
            change_listeners: Listeners::default(),
            security_listeners: Listeners::default(),
            housekeeping_listeners: Listeners::default(),
        }
    }

    /// Create a context wired to the running system.
    ///
    /// `FWUPD_EFIVARS=dummy` installs the in-memory variable store.
    pub fn with_system() -> Self {
        let efivars: Box<dyn Efivars> = if std::env::var_os("FWUPD_EFIVARS").is_some_and(|v| v == "dummy") {
            Box::new(DummyEfivars::new())
        } else {
            Box::new(SystemEfivars::new())
        };
        let mut context = Self::new(Box::new(volumes::SysInventory::new()), efivars);
        context.add_hwid_backend(Box::new(DmiBackend::new()));
        context.add_firmware_type::<PeImage>("pefile");
        context
    }

    pub fn efivars(&self) -> &dyn Efivars {
        self.efivars.as_ref()
    }

    /// Where scoped mounts are created
    pub fn set_mount_base(&mut self, base: impl Into<PathBuf>) {
        self.mount_base = base.into();
    }

    pub fn set_quirk_lookup(&mut self, quirks: Box<dyn QuirkLookup>) {
        self.quirks = quirks;
    }

    pub fn lookup_quirk(&self, guid: &str, key: &str) -> Option<String> {
        self.quirks.lookup(guid, key)
    }

    /* flags */

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn has_flag(&self, flag: ContextFlags) -> bool {
        self.flags.intersects(flag)
    }

    pub fn add_flag(&mut self, flag: ContextFlags) {
        if self.flags.contains(flag) {
            return;
        }
        let old = self.flags;
        self.flags.insert(flag);
        self.change_listeners.emit(&ChangeEvent::Flags { old, new: self.flags });
    }

    pub fn remove_flag(&mut self, flag: ContextFlags) {
        if !self.flags.intersects(flag) {
            return;
        }
        let old = self.flags;
        self.flags.remove(flag);
        self.change_listeners.emit(&ChangeEvent::Flags { old, new: self.flags });
    }

    /* host state */

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn set_power_state(&mut self, power_state: PowerState) {
        if self.power_state == power_state {
            return;
        }
        let old = std::mem::replace(&mut self.power_state, power_state);
        log::info!("power state now {power_state}");
        self.change_listeners
            .emit(&ChangeEvent::PowerState { old, new: power_state });
    }

    pub fn lid_state(&self) -> LidState {
        self.lid_state
    }

    pub fn set_lid_state(&mut self, lid_state: LidState) {
        if self.lid_state == lid_state {
            return;
        }
        let old = std::mem::replace(&mut self.lid_state, lid_state);
        log::info!("lid state now {lid_state}");
        self.change_listeners.emit(&ChangeEvent::LidState { old, new: lid_state });
    }

    pub fn display_state(&self) -> DisplayState {
        self.display_state
    }

    pub fn set_display_state(&mut self, display_state: DisplayState) {
        if self.display_state == display_state {
            return;
        }
        let old = std::mem::replace(&mut self.display_state, display_state);
        log::info!("display state now {display_state}");
        self.change_listeners
            .emit(&ChangeEvent::DisplayState { old, new: display_state });
    }

    pub fn battery_level(&self) -> u32 {
        self.battery_level
    }

    pub fn set_battery_level(&mut self, battery_level: u32) {
        if battery_level > BATTERY_LEVEL_INVALID {
            log::warn!("ignoring out of range battery level {battery_level}");
            return;
        }
        if self.battery_level == battery_level {
            return;
        }
        let old = std::mem::replace(&mut self.battery_level, battery_level);
        log::info!("battery level now {battery_level}");
        self.change_listeners
            .emit(&ChangeEvent::BatteryLevel { old, new: battery_level });
    }

    pub fn battery_threshold(&self) -> u32 {
        self.battery_threshold
    }

    pub fn set_battery_threshold(&mut self, battery_threshold: u32) {
        if battery_threshold > BATTERY_LEVEL_INVALID {
            log::warn!("ignoring out of range battery threshold {battery_threshold}");
            return;
        }
        if self.battery_threshold == battery_threshold {
            return;
        }
        let old = std::mem::replace(&mut self.battery_threshold, battery_threshold);
        log::info!("battery threshold now {battery_threshold}");
        self.change_listeners
            .emit(&ChangeEvent::BatteryThreshold { old, new: battery_threshold });
    }

    pub fn chassis_kind(&self) -> ChassisKind {
        self.chassis_kind
    }

    pub fn set_chassis_kind(&mut self, chassis_kind: ChassisKind) {
        self.chassis_kind = chassis_kind;
    }

    /* notifications */

    pub fn register_change_listener(&mut self, listener: Box<dyn Fn(&ChangeEvent)>) -> ListenerHandle {
        self.change_listeners.register(listener)
    }

    pub fn unregister_change_listener(&mut self, handle: ListenerHandle) -> bool {
        self.change_listeners.unregister(handle)
    }

    pub fn register_security_listener(&mut self, listener: Box<dyn Fn(&())>) -> ListenerHandle {
        self.security_listeners.register(listener)
    }

    pub fn unregister_security_listener(&mut self, handle: ListenerHandle) -> bool {
        self.security_listeners.unregister(handle)
    }

    pub fn register_housekeeping_listener(&mut self, listener: Box<dyn Fn(&())>) -> ListenerHandle {
        self.housekeeping_listeners.register(listener)
    }

    pub fn unregister_housekeeping_listener(&mut self, handle: ListenerHandle) -> bool {
        self.housekeeping_listeners.unregister(handle)
    }

    /// Inform listeners that the platform security state may have changed
    pub fn security_changed(&self) {
        self.security_listeners.emit(&());
    }

    /// Run idle maintenance listeners
    pub fn housekeeping(&self) {
        self.housekeeping_listeners.emit(&());
    }

    /* udev subsystem registry */

    /// Register a udev subsystem watch, `base` or `base:subkind`.
    ///
    /// A `base:subkind` key implicitly registers `base` too.
    pub fn add_udev_subsystem(&mut self, subsystem: &str, plugin_name: Option<&str>) {
        if let Some((base, _)) = subsystem.split_once(':') {
            self.add_udev_subsystem(base, None);
        }
        let newly_added = !self.udev_subsystems.contains_key(subsystem);
        let names = self.udev_subsystems.entry(subsystem.to_string()).or_default();
        if let Some(plugin) = plugin_name {
            if !names.iter().any(|n| n == plugin) {
                names.push(plugin.to_string());
                names.sort();
                log::info!("added udev subsystem watch of {subsystem} for plugin {plugin}");
            }
        } else if newly_added {
            log::info!("added udev subsystem watch of {subsystem}");
        }
    }

    /// Plugins registered for a subsystem, base matches before exact matches
    pub fn plugin_names_for_udev_subsystem(&self, subsystem: &str) -> Result<Vec<String>, Error> {
        let mut names = vec![];
        if let Some((base, _)) = subsystem.split_once(':') {
            if let Some(base_names) = self.udev_subsystems.get(base) {
                names.extend(base_names.iter().cloned());
            }
        }
        if let Some(exact_names) = self.udev_subsystems.get(subsystem) {
            names.extend(exact_names.iter().cloned());
        }
        ensure!(!names.is_empty(), NoPluginsForSubsystemSnafu { subsystem });
        Ok(names)
    }

    pub fn udev_subsystems(&self) -> Vec<String> {
        self.udev_subsystems.keys().cloned().collect()
    }

    /* firmware parser registry */

    /// Register a firmware parser under a tag, e.g. `pefile`
    pub fn add_firmware_type<F>(&mut self, tag: &str)
    where
        F: Firmware + Default + 'static,
    {
        self.firmware_types.insert(
            tag.to_string(),
            FirmwareEntry {
                factory: Box::new(|| Box::new(F::default())),
                type_id: TypeId::of::<F>(),
            },
        );
    }

    /// Construct a fresh parser for the tag
    pub fn create_firmware(&self, tag: &str) -> Option<Box<dyn Firmware>> {
        self.firmware_types.get(tag).map(|entry| (entry.factory)())
    }

    pub fn firmware_type_id(&self, tag: &str) -> Option<TypeId> {
        self.firmware_types.get(tag).map(|entry| entry.type_id)
    }

    /// All registered tags, lexicographic
    pub fn firmware_tags(&self) -> Vec<String> {
        self.firmware_types.keys().cloned().collect()
    }

    /* version registries */

    pub fn add_runtime_version(&mut self, component_id: &str, version: &str) {
        self.runtime_versions.insert(component_id.to_string(), version.to_string());
    }

    pub fn runtime_version(&self, component_id: &str) -> Option<&str> {
        self.runtime_versions.get(component_id).map(String::as_str)
    }

    pub fn runtime_versions(&self) -> &BTreeMap<String, String> {
        &self.runtime_versions
    }

    pub fn add_compile_version(&mut self, component_id: &str, version: &str) {
        self.compile_versions.insert(component_id.to_string(), version.to_string());
    }

    pub fn compile_versions(&self) -> &BTreeMap<String, String> {
        &self.compile_versions
    }

    /* backends */

    pub fn add_backend(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn backends(&self) -> &[Box<dyn Backend>] {
        &self.backends
    }

    pub fn backend_by_name(&self, name: &str) -> Result<&dyn Backend, Error> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .map(Box::as_ref)
            .ok_or_else(|| NoBackendSnafu { name }.build())
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.backends.iter().any(|b| b.name() == name)
    }

    /* keyed data */

    pub fn set_data(&mut self, key: &str, value: Rc<dyn Any>) {
        self.data.insert(key.to_string(), value);
    }

    pub fn data(&self, key: &str) -> Option<Rc<dyn Any>> {
        self.data.get(key).cloned()
    }

    /* efivars */

    /// Check the NVRAM store has at least `count` free bytes
    pub fn efivars_check_free_space(&self, count: u64) -> Result<(), Error> {
        // escape hatch
        if self.has_flag(ContextFlags::IGNORE_EFIVARS_FREE_SPACE) {
            return Ok(());
        }
        let got = self.efivars.space_free()?;
        ensure!(got >= count, EfivarsSpaceSnafu { requested: count, got });
        Ok(())
    }

    /* FDT */

    /// The parsed system device tree; loaded once and cached
    pub fn fdt(&self) -> Result<Rc<Fdt>, Error> {
        if let Some(fdt) = self.fdt.borrow().as_ref() {
            return Ok(fdt.clone());
        }
        let fdt = Rc::new(load_fdt(&localstatedir(), &sysfs_fw_dir())?);
        *self.fdt.borrow_mut() = Some(fdt.clone());
        Ok(fdt)
    }

    /* hardware information */

    pub fn add_hwid_backend(&mut self, backend: Box<dyn HwidBackend>) {
        self.hwid_backends.push(backend);
    }

    /// Load the hardware identity of the running machine.
    ///
    /// Backends run in a fixed order and individual failures are tolerated;
    /// the call then resolves HWID custom flags through the quirk database
    /// and probes block devices for full disk encryption markers.
    pub fn load_hwinfo(&mut self, flags: HwidSetupFlags) -> Result<(), Error> {
        const ORDER: [HwidSetupFlags; 6] = [
            HwidSetupFlags::CONFIG,
            HwidSetupFlags::SMBIOS,
            HwidSetupFlags::FDT,
            HwidSetupFlags::KENV,
            HwidSetupFlags::DMI,
            HwidSetupFlags::DARWIN,
        ];
        for flag in ORDER {
            if !flags.contains(flag) {
                continue;
            }
            for backend in &self.hwid_backends {
                if backend.flag() != flag {
                    continue;
                }
                if let Err(error) = backend.setup(&mut self.hwids) {
                    log::info!("failed to load {}: {error}", backend.name());
                }
            }
        }
        self.hwids.compute_guids();
        self.add_flag(ContextFlags::LOADED_HWINFO);

        let enclosure = self.hwids.value("EnclosureKind").and_then(|v| v.parse::<u8>().ok());
        if let Some(value) = enclosure {
            self.set_chassis_kind(ChassisKind::from_dmi(value));
        }

        // every HWID GUID may carry extra flags in the quirk database
        let guids = self.hwids.guids().to_vec();
        for guid in guids {
            let Some(value) = self.quirks.lookup(&guid, QUIRKS_KEY_FLAGS) else {
                continue;
            };
            for flag in value.split(',') {
                self.hwid_flags.insert(flag.trim().to_string());
            }
        }

        self.detect_full_disk_encryption();
        Ok(())
    }

    fn detect_full_disk_encryption(&mut self) {
        let devices = match self.inventory.block_devices() {
            Ok(devices) => devices,
            Err(error) => {
                log::info!("failed to get block devices: {error}");
                return;
            }
        };
        for device in devices {
            if device.id_type == "BitLocker" {
                self.add_flag(ContextFlags::FDE_BITLOCKER);
            }
            if device.id_type == "crypto_LUKS" && device.id_label.as_deref() == Some("ubuntu-data-enc") {
                self.add_flag(ContextFlags::FDE_SNAPD);
            }
        }
    }

    fn ensure_hwinfo_loaded(&self) -> Result<(), Error> {
        if !self.has_flag(ContextFlags::LOADED_HWINFO) {
            log::error!("cannot use HWID values before calling load_hwinfo()");
            return HwinfoNotLoadedSnafu.fail();
        }
        Ok(())
    }

    pub fn hwid_guids(&self) -> Result<Vec<String>, Error> {
        self.ensure_hwinfo_loaded()?;
        Ok(self.hwids.guids().to_vec())
    }

    pub fn has_hwid_guid(&self, guid: &str) -> Result<bool, Error> {
        self.ensure_hwinfo_loaded()?;
        Ok(self.hwids.guids().iter().any(|g| g == guid))
    }

    pub fn hwid_value(&self, key: &str) -> Result<Option<String>, Error> {
        self.ensure_hwinfo_loaded()?;
        Ok(self.hwids.value(key).map(str::to_string))
    }

    /// A HWID custom flag, typically set from a DMI quirk
    pub fn has_hwid_flag(&self, flag: &str) -> bool {
        self.hwid_flags.contains(flag)
    }
}

fn localstatedir() -> PathBuf {
    std::env::var_os("FWUPD_LOCALSTATEDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib/fwupd"))
}

fn sysfs_fw_dir() -> PathBuf {
    std::env::var_os("FWUPD_SYSFSFWDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/sys/firmware"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{counting_listener, MockInventory};
    use std::cell::Cell;
    use volumes::BlockDevice;

    fn test_context() -> Context {
        Context::new(Box::new(MockInventory::default()), Box::new(DummyEfivars::new()))
    }

    #[test]
    fn flag_transitions_notify_once() {
        let mut context = test_context();
        let (count, listener) = counting_listener();
        context.register_change_listener(listener);

        context.add_flag(ContextFlags::SYSTEM_INHIBIT);
        context.add_flag(ContextFlags::SYSTEM_INHIBIT);
        assert_eq!(count.get(), 1);
        assert!(context.has_flag(ContextFlags::SYSTEM_INHIBIT));

        context.remove_flag(ContextFlags::SYSTEM_INHIBIT);
        assert_eq!(count.get(), 2);
        context.remove_flag(ContextFlags::SYSTEM_INHIBIT);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn scalar_setters_notify_on_transition_only() {
        let mut context = test_context();
        let (count, listener) = counting_listener();
        context.register_change_listener(listener);

        context.set_power_state(PowerState::BatteryDischarging);
        context.set_power_state(PowerState::BatteryDischarging);
        assert_eq!(count.get(), 1);
        assert_eq!(context.power_state(), PowerState::BatteryDischarging);

        context.set_battery_level(50);
        context.set_battery_level(50);
        assert_eq!(count.get(), 2);

        // out of range is rejected without a notification
        context.set_battery_level(150);
        assert_eq!(count.get(), 2);
        assert_eq!(context.battery_level(), 50);
    }

    #[test]
    fn change_events_carry_before_and_after() {
        let mut context = test_context();
        let seen: Rc<RefCell<Vec<ChangeEvent>>> = Rc::default();
        {
            let seen = seen.clone();
            context.register_change_listener(Box::new(move |event| seen.borrow_mut().push(event.clone())));
        }
        context.set_lid_state(LidState::Closed);
        assert_eq!(
            seen.borrow().as_slice(),
            &[ChangeEvent::LidState {
                old: LidState::Unknown,
                new: LidState::Closed
            }]
        );
    }

    #[test]
    fn security_and_housekeeping_fan_out_in_order() {
        let mut context = test_context();
        let order: Rc<RefCell<Vec<u32>>> = Rc::default();
        for n in 0..3 {
            let order = order.clone();
            context.register_security_listener(Box::new(move |_| order.borrow_mut().push(n)));
        }
        context.security_changed();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);

        let fired = Rc::new(Cell::new(false));
        {
            let fired = fired.clone();
            let handle = context.register_housekeeping_listener(Box::new(move |_| fired.set(true)));
            assert!(context.unregister_housekeeping_listener(handle));
        }
        context.housekeeping();
        assert!(!fired.get());
    }

    #[test]
    fn udev_subsystem_registry() {
        let mut context = test_context();
        context.add_udev_subsystem("block:partition", Some("uefi-capsule"));
        context.add_udev_subsystem("block", Some("amd-kria"));
        context.add_udev_subsystem("block", Some("uefi-capsule"));
        context.add_udev_subsystem("block", Some("amd-kria"));

        // base registered implicitly, names deduplicated and sorted
        let mut subsystems = context.udev_subsystems();
        subsystems.sort();
        assert_eq!(subsystems, vec!["block", "block:partition"]);
        assert_eq!(
            context.plugin_names_for_udev_subsystem("block").unwrap(),
            vec!["amd-kria", "uefi-capsule"]
        );
        // base names come before the exact match
        assert_eq!(
            context.plugin_names_for_udev_subsystem("block:partition").unwrap(),
            vec!["amd-kria", "uefi-capsule", "uefi-capsule"]
        );
        assert_eq!(
            context.plugin_names_for_udev_subsystem("hidraw").unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
    }

    #[test]
    fn firmware_registry_round_trip() {
        let mut context = test_context();
        context.add_firmware_type::<PeImage>("pefile");
        assert_eq!(context.firmware_tags(), vec!["pefile"]);
        assert_eq!(context.firmware_type_id("pefile"), Some(TypeId::of::<PeImage>()));
        assert!(context.create_firmware("pefile").is_some());
        assert!(context.create_firmware("ihex").is_none());
    }

    #[test]
    fn backend_lookup() {
        #[derive(Debug)]
        struct Named(&'static str);
        impl Backend for Named {
            fn name(&self) -> &str {
                self.0
            }
        }
        let mut context = test_context();
        context.add_backend(Box::new(Named("usb")));
        assert!(context.has_backend("usb"));
        assert_eq!(context.backend_by_name("usb").unwrap().name(), "usb");
        assert_eq!(
            context.backend_by_name("udev").unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
    }

    #[test]
    fn hwid_access_is_guarded() {
        let context = test_context();
        assert_eq!(context.hwid_guids().unwrap_err().kind(), crate::ErrorKind::Internal);
        assert_eq!(context.hwid_value("Manufacturer").unwrap_err().kind(), crate::ErrorKind::Internal);
    }

    #[test]
    fn load_hwinfo_sets_flags_and_quirks() {
        struct FixedBackend;
        impl HwidBackend for FixedBackend {
            fn name(&self) -> &str {
                "fixed"
            }
            fn flag(&self) -> HwidSetupFlags {
                HwidSetupFlags::SMBIOS
            }
            fn setup(&self, hwids: &mut Hwids) -> Result<(), Error> {
                hwids.add_value("Manufacturer", "LENOVO");
                hwids.add_value("ProductName", "ThinkPad X1");
                Ok(())
            }
        }
        struct FailingBackend;
        impl HwidBackend for FailingBackend {
            fn name(&self) -> &str {
                "failing"
            }
            fn flag(&self) -> HwidSetupFlags {
                HwidSetupFlags::CONFIG
            }
            fn setup(&self, _hwids: &mut Hwids) -> Result<(), Error> {
                crate::HwinfoNotLoadedSnafu.fail()
            }
        }
        struct AllFlagsQuirk;
        impl QuirkLookup for AllFlagsQuirk {
            fn lookup(&self, _guid: &str, key: &str) -> Option<String> {
                (key == "Flags").then(|| "use-legacy-bootmgr-desc,no-ux-capsule".to_string())
            }
        }

        let mut context = test_context();
        context.add_hwid_backend(Box::new(FailingBackend));
        context.add_hwid_backend(Box::new(FixedBackend));
        context.set_quirk_lookup(Box::new(AllFlagsQuirk));
        context.load_hwinfo(HwidSetupFlags::all()).unwrap();

        assert!(context.has_flag(ContextFlags::LOADED_HWINFO));
        assert!(!context.hwid_guids().unwrap().is_empty());
        assert_eq!(context.hwid_value("Manufacturer").unwrap().as_deref(), Some("LENOVO"));
        assert!(context.has_hwid_flag("use-legacy-bootmgr-desc"));
        assert!(context.has_hwid_flag("no-ux-capsule"));
        assert!(!context.has_hwid_flag("other"));
    }

    #[test]
    fn fde_markers_set_context_flags() {
        let inventory = MockInventory::default().with_block_devices(vec![
            BlockDevice {
                device: "/dev/sda3".into(),
                id_type: "BitLocker".into(),
                id_label: None,
            },
            BlockDevice {
                device: "/dev/sda4".into(),
                id_type: "crypto_LUKS".into(),
                id_label: Some("ubuntu-data-enc".into()),
            },
        ]);
        let mut context = Context::new(Box::new(inventory), Box::new(DummyEfivars::new()));
        context.load_hwinfo(HwidSetupFlags::empty()).unwrap();
        assert!(context.has_flag(ContextFlags::FDE_BITLOCKER));
        assert!(context.has_flag(ContextFlags::FDE_SNAPD));
    }

    #[test]
    fn efivars_free_space_check() {
        let mut efivars = DummyEfivars::new();
        efivars.set_space_free(100);
        let mut context = Context::new(Box::new(MockInventory::default()), Box::new(efivars));

        let error = context.efivars_check_free_space(200).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::BrokenSystem);
        assert_eq!(
            error.to_string(),
            "Not enough efivarfs space, requested 200 B and got 100 B"
        );
        assert!(context.efivars_check_free_space(100).is_ok());

        context.add_flag(ContextFlags::IGNORE_EFIVARS_FREE_SPACE);
        assert!(context.efivars_check_free_space(200).is_ok());
    }
}
