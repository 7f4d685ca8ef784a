// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! efivarfs-backed variable store

use std::path::PathBuf;

use fs_err as fs;

use super::{Efivars, LoadOption, EFI_GLOBAL_VARIABLE_GUID};
use crate::{Error, InvalidLoadOptionSnafu, NoBootEntrySnafu};

/// The kernel's efivarfs view of NVRAM, usually `/sys/firmware/efi/efivars`
#[derive(Debug)]
pub struct SystemEfivars {
    root: PathBuf,
}

impl Default for SystemEfivars {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemEfivars {
    pub fn new() -> Self {
        Self::with_root("/sys/firmware/efi/efivars")
    }

    /// With an explicit efivarfs root, for tests
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read a global-GUID variable, stripping the 4-byte attribute prefix
    /// efivarfs prepends to every payload
    fn read_variable(&self, name: &str) -> Result<Vec<u8>, std::io::Error> {
        let path = self.root.join(format!("{name}-{EFI_GLOBAL_VARIABLE_GUID}"));
        let data = fs::read(path)?;
        Ok(data.get(4..).unwrap_or_default().to_vec())
    }
}

impl Efivars for SystemEfivars {
    fn space_free(&self) -> Result<u64, Error> {
        let stat = nix::sys::statvfs::statvfs(&self.root)
            .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
        Ok(stat.block_size() as u64 * stat.blocks_available() as u64)
    }

    fn boot_order(&self) -> Result<Vec<u16>, Error> {
        let data = match self.read_variable("BootOrder") {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no BootOrder variable");
                return Ok(vec![]);
            }
            Err(error) => return Err(error.into()),
        };
        snafu::ensure!(
            data.len() % 2 == 0,
            InvalidLoadOptionSnafu {
                reason: "odd BootOrder length",
            }
        );
        Ok(data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    fn boot_entry(&self, idx: u16) -> Result<LoadOption, Error> {
        let data = match self.read_variable(&format!("Boot{idx:04X}")) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return NoBootEntrySnafu { idx }.fail();
            }
            Err(error) => return Err(error.into()),
        };
        LoadOption::parse(idx, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hwcontext-efivars-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_variable(root: &std::path::Path, name: &str, payload: &[u8]) {
        let mut data = vec![0x07, 0x00, 0x00, 0x00]; // NV+BS+RT attributes
        data.extend_from_slice(payload);
        fs::write(root.join(format!("{name}-{EFI_GLOBAL_VARIABLE_GUID}")), data).unwrap();
    }

    #[test]
    fn reads_boot_order_and_entries() {
        let root = fixture_root("entries");
        write_variable(&root, "BootOrder", &[0x01, 0x00, 0x03, 0x00]);
        write_variable(&root, "Boot0001", &LoadOption::new(1, "first").to_bytes());
        // Boot0003 deliberately missing

        let efivars = SystemEfivars::with_root(&root);
        assert_eq!(efivars.boot_order().unwrap(), vec![1, 3]);

        let entries = efivars.boot_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].idx(), 1);
        assert_eq!(entries[0].description(), "first");

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn missing_boot_order_is_empty() {
        let root = fixture_root("empty");
        let efivars = SystemEfivars::with_root(&root);
        assert!(efivars.boot_order().unwrap().is_empty());
        fs::remove_dir_all(root).unwrap();
    }
}
