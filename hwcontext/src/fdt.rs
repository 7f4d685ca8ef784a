// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! System flattened device tree lookup and cache

use std::path::PathBuf;

use fs_err as fs;
use snafu::ensure;

use crate::{Error, FdtNotFoundSnafu, InvalidFdtSnafu};

const FDT_MAGIC: u32 = 0xD00D_FEED;
const FDT_HEADER_LEN: usize = 40;

/// A validated flattened device tree blob
#[derive(Debug, Clone)]
pub struct Fdt {
    total_size: u32,
    data: Vec<u8>,
}

impl Fdt {
    pub fn parse(data: Vec<u8>) -> Result<Self, Error> {
        ensure!(
            data.len() >= FDT_HEADER_LEN,
            InvalidFdtSnafu {
                reason: format!("{} bytes is too small for a header", data.len()),
            }
        );
        let magic = u32::from_be_bytes(data[0..4].try_into().expect("length checked"));
        ensure!(
            magic == FDT_MAGIC,
            InvalidFdtSnafu {
                reason: format!("bad magic {magic:#010x}"),
            }
        );
        let total_size = u32::from_be_bytes(data[4..8].try_into().expect("length checked"));
        ensure!(
            total_size as usize <= data.len(),
            InvalidFdtSnafu {
                reason: format!("declared size {total_size} exceeds blob"),
            }
        );
        Ok(Self { total_size, data })
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Locate the FDT source: local override first, then the firmware export
pub(crate) fn fdt_source(localstatedir: &std::path::Path, sysfs_fw_dir: &std::path::Path) -> Result<PathBuf, Error> {
    let local = localstatedir.join("system.dtb");
    if local.exists() {
        return Ok(local);
    }
    let sys = sysfs_fw_dir.join("fdt");
    if sys.exists() {
        return Ok(sys);
    }
    FdtNotFoundSnafu { sys, local }.fail()
}

pub(crate) fn load_fdt(localstatedir: &std::path::Path, sysfs_fw_dir: &std::path::Path) -> Result<Fdt, Error> {
    let path = fdt_source(localstatedir, sysfs_fw_dir)?;
    log::debug!("loading FDT from {}", path.display());
    Fdt::parse(fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn blob() -> Vec<u8> {
        let mut data = vec![0u8; FDT_HEADER_LEN];
        data[0..4].copy_from_slice(&FDT_MAGIC.to_be_bytes());
        data[4..8].copy_from_slice(&(FDT_HEADER_LEN as u32).to_be_bytes());
        data
    }

    #[test]
    fn parse_valid_blob() {
        let fdt = Fdt::parse(blob()).unwrap();
        assert_eq!(fdt.total_size(), FDT_HEADER_LEN as u32);
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut data = blob();
        data[0] = 0;
        assert_eq!(Fdt::parse(data).unwrap_err().kind(), crate::ErrorKind::InvalidFile);
    }

    #[test]
    fn override_takes_precedence() {
        let dir = std::env::temp_dir().join(format!("hwcontext-fdt-test-{}", std::process::id()));
        let local = dir.join("state");
        let firmware = dir.join("fw");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&firmware).unwrap();

        assert_eq!(
            fdt_source(&local, &firmware).unwrap_err().kind(),
            crate::ErrorKind::NotSupported
        );

        fs::write(firmware.join("fdt"), blob()).unwrap();
        assert_eq!(fdt_source(&local, &firmware).unwrap(), firmware.join("fdt"));

        fs::write(local.join("system.dtb"), blob()).unwrap();
        assert_eq!(fdt_source(&local, &firmware).unwrap(), local.join("system.dtb"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_sources_name_both_paths() {
        let error = fdt_source(Path::new("/nonexistent/state"), Path::new("/nonexistent/fw")).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/fw/fdt"));
        assert!(error.to_string().contains("/nonexistent/state/system.dtb"));
    }
}
