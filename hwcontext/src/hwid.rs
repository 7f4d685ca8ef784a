// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Hardware identifier stores and backends.
//!
//! The HWID GUIDs follow the Microsoft ComputerHardwareIds scheme: a
//! name-based GUID over the UTF-16LE join of selected DMI values.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bitflags::bitflags;
use fs_err as fs;
use uuid::Uuid;

use crate::Error;

bitflags! {
    /// Which hardware information backends to drive
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HwidSetupFlags: u32 {
        const CONFIG = 1 << 0;
        const SMBIOS = 1 << 1;
        const FDT = 1 << 2;
        const KENV = 1 << 3;
        const DMI = 1 << 4;
        const DARWIN = 1 << 5;
    }
}

/// The Microsoft HardwareID namespace
const HWID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x70, 0xff, 0xd8, 0x12, 0x4c, 0x7f, 0x4c, 0x7d, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
]);

/// Value combinations hashed into HWID GUIDs, most specific first
const HWID_COMBOS: &[&[&str]] = &[
    &["Manufacturer", "Family", "ProductName", "ProductSku", "BiosVendor", "BiosVersion"],
    &["Manufacturer", "Family", "ProductName", "ProductSku"],
    &["Manufacturer", "Family", "ProductName"],
    &["Manufacturer", "ProductSku"],
    &["Manufacturer", "ProductName"],
    &["Manufacturer", "BaseboardManufacturer", "BaseboardProduct"],
    &["Manufacturer"],
];

/// Accumulated hardware identity facts
#[derive(Debug, Default)]
pub struct Hwids {
    values: BTreeMap<String, String>,
    guids: Vec<String>,
}

impl Hwids {
    /// Record one identity value; empty values are dropped
    pub fn add_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.values.insert(key.into(), value);
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn guids(&self) -> &[String] {
        &self.guids
    }

    /// Derive the GUID list from the recorded values
    pub fn compute_guids(&mut self) {
        self.guids.clear();
        for combo in HWID_COMBOS {
            let Some(values) = combo
                .iter()
                .map(|&key| self.value(key))
                .collect::<Option<Vec<_>>>()
            else {
                continue;
            };
            let joined = values.join("&");
            let mut utf16 = vec![];
            for unit in joined.encode_utf16() {
                utf16.extend_from_slice(&unit.to_le_bytes());
            }
            let guid = Uuid::new_v5(&HWID_NAMESPACE, &utf16).hyphenated().to_string();
            if !self.guids.contains(&guid) {
                self.guids.push(guid);
            }
        }
    }
}

/// One source of hardware identity values
pub trait HwidBackend {
    fn name(&self) -> &str;

    /// Which [`HwidSetupFlags`] bit enables this backend
    fn flag(&self) -> HwidSetupFlags;

    fn setup(&self, hwids: &mut Hwids) -> Result<(), Error>;
}

/// Identity values from the kernel's DMI export under `/sys/class/dmi/id`.
///
/// This reads the pre-extracted sysfs strings; it does not parse SMBIOS
/// tables.
#[derive(Debug)]
pub struct DmiBackend {
    root: PathBuf,
}

impl Default for DmiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DmiBackend {
    pub fn new() -> Self {
        Self::with_root("/sys/class/dmi/id")
    }

    /// With an explicit attribute directory, for tests
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

const DMI_ATTRIBUTES: &[(&str, &str)] = &[
    ("sys_vendor", "Manufacturer"),
    ("product_family", "Family"),
    ("product_name", "ProductName"),
    ("product_sku", "ProductSku"),
    ("bios_vendor", "BiosVendor"),
    ("bios_version", "BiosVersion"),
    ("board_vendor", "BaseboardManufacturer"),
    ("board_name", "BaseboardProduct"),
    ("chassis_type", "EnclosureKind"),
];

impl HwidBackend for DmiBackend {
    fn name(&self) -> &str {
        "dmi"
    }

    fn flag(&self) -> HwidSetupFlags {
        HwidSetupFlags::DMI
    }

    fn setup(&self, hwids: &mut Hwids) -> Result<(), Error> {
        // fail when the export is missing entirely, tolerate single attributes
        fs::metadata(&self.root)?;
        for (attribute, key) in DMI_ATTRIBUTES {
            match fs::read_to_string(self.root.join(attribute)) {
                Ok(value) => hwids.add_value(*key, value.trim()),
                Err(error) => log::trace!("no DMI attribute {attribute}: {error}"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guids_are_stable_and_deduplicated() {
        let mut hwids = Hwids::default();
        hwids.add_value("Manufacturer", "LENOVO");
        hwids.add_value("ProductName", "ThinkPad X1");
        hwids.compute_guids();

        let guids = hwids.guids().to_vec();
        assert!(!guids.is_empty());
        assert_eq!(
            guids.iter().collect::<std::collections::BTreeSet<_>>().len(),
            guids.len()
        );

        // same inputs, same outputs
        hwids.compute_guids();
        assert_eq!(hwids.guids(), guids.as_slice());
    }

    #[test]
    fn empty_values_are_dropped() {
        let mut hwids = Hwids::default();
        hwids.add_value("Manufacturer", "");
        assert_eq!(hwids.value("Manufacturer"), None);
        hwids.compute_guids();
        assert!(hwids.guids().is_empty());
    }

    #[test]
    fn dmi_backend_reads_sysfs_export() {
        let root = std::env::temp_dir().join(format!("hwcontext-dmi-test-{}", std::process::id()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("sys_vendor"), "LENOVO\n").unwrap();
        fs::write(root.join("product_name"), "ThinkPad X1\n").unwrap();

        let mut hwids = Hwids::default();
        DmiBackend::with_root(&root).setup(&mut hwids).unwrap();
        assert_eq!(hwids.value("Manufacturer"), Some("LENOVO"));
        assert_eq!(hwids.value("ProductName"), Some("ThinkPad X1"));
        assert_eq!(hwids.value("Family"), None);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn dmi_backend_fails_without_export() {
        let mut hwids = Hwids::default();
        assert!(DmiBackend::with_root("/nonexistent/dmi/id").setup(&mut hwids).is_err());
    }
}
