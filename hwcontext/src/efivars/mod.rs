// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! EFI variable store providers

use crate::efipath::DevicePathList;
use crate::{Error, InvalidLoadOptionSnafu};
use snafu::ensure;

mod dummy;
mod system;

pub use dummy::DummyEfivars;
pub use system::SystemEfivars;

/// Vendor GUID of the global EFI variables, `BootOrder` and friends
pub const EFI_GLOBAL_VARIABLE_GUID: &str = "8be4df61-93ca-11d2-aa0d-00e098032b8c";

/// The second-stage loader override key of [`LoadOption::metadata`]
pub const LOAD_OPTION_METADATA_PATH: &str = "PATH";

/// Access to the EFI NVRAM variable store
pub trait Efivars {
    /// Free bytes in the variable store
    fn space_free(&self) -> Result<u64, Error>;

    /// The `BootOrder` list; empty when the variable is absent
    fn boot_order(&self) -> Result<Vec<u16>, Error>;

    /// One `Boot####` load option
    fn boot_entry(&self, idx: u16) -> Result<LoadOption, Error>;

    /// Every load option in `BootOrder` order.
    ///
    /// Entries named by the order but missing or unparsable are logged and
    /// skipped; the rest keep their relative order.
    fn boot_entries(&self) -> Result<Vec<LoadOption>, Error> {
        let mut entries = vec![];
        for idx in self.boot_order()? {
            match self.boot_entry(idx) {
                Ok(entry) => entries.push(entry),
                Err(error) => log::debug!("skipping Boot{idx:04X}: {error}"),
            }
        }
        Ok(entries)
    }
}

/// One `Boot####` variable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOption {
    idx: u16,
    attributes: u32,
    description: String,
    device_path: DevicePathList,
    optional_data: Vec<u8>,
}

impl LoadOption {
    pub fn new(idx: u16, description: impl Into<String>) -> Self {
        Self {
            idx,
            attributes: 0x1, // LOAD_OPTION_ACTIVE
            description: description.into(),
            device_path: DevicePathList::default(),
            optional_data: vec![],
        }
    }

    /// With the given device-path list
    pub fn with_device_path(self, device_path: DevicePathList) -> Self {
        Self { device_path, ..self }
    }

    /// With raw optional data
    pub fn with_optional_data(self, optional_data: Vec<u8>) -> Self {
        Self { optional_data, ..self }
    }

    /// Decode from the variable payload, attribute prefix already stripped
    pub fn parse(idx: u16, data: &[u8]) -> Result<Self, Error> {
        ensure!(
            data.len() >= 6,
            InvalidLoadOptionSnafu {
                reason: format!("{} bytes is too short", data.len()),
            }
        );
        let attributes = u32::from_le_bytes(data[0..4].try_into().expect("length checked"));
        let dp_len = u16::from_le_bytes(data[4..6].try_into().expect("length checked")) as usize;

        // description: UTF-16LE, NUL terminated
        let mut units = vec![];
        let mut offset = 6;
        loop {
            ensure!(
                offset + 2 <= data.len(),
                InvalidLoadOptionSnafu {
                    reason: "unterminated description",
                }
            );
            let unit = u16::from_le_bytes([data[offset], data[offset + 1]]);
            offset += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let description = String::from_utf16(&units).map_err(|_| {
            InvalidLoadOptionSnafu {
                reason: "description is not UTF-16",
            }
            .build()
        })?;

        ensure!(
            offset + dp_len <= data.len(),
            InvalidLoadOptionSnafu {
                reason: format!("device path length {dp_len} out of range"),
            }
        );
        let device_path = DevicePathList::parse(&data[offset..offset + dp_len])?;
        let optional_data = data[offset + dp_len..].to_vec();

        Ok(Self {
            idx,
            attributes,
            description,
            device_path,
            optional_data,
        })
    }

    /// Encode back to the variable payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let dp = self.device_path.to_bytes();
        let mut out = vec![];
        out.extend_from_slice(&self.attributes.to_le_bytes());
        out.extend_from_slice(&(dp.len() as u16).to_le_bytes());
        for unit in self.description.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&dp);
        out.extend_from_slice(&self.optional_data);
        out
    }

    pub fn idx(&self) -> u16 {
        self.idx
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn device_path(&self) -> &DevicePathList {
        &self.device_path
    }

    /// Key/value metadata carried outside the device path.
    ///
    /// shim records a non-default second stage as a path string in the
    /// optional data; that surfaces as the `PATH` key.
    pub fn metadata(&self, key: &str) -> Option<String> {
        if key != LOAD_OPTION_METADATA_PATH {
            return None;
        }
        let text = decode_path_hint(&self.optional_data)?;
        let normalised = text.replace('\\', "/");
        Some(normalised.trim_start_matches('/').to_string())
    }
}

/// Interpret optional data as a loader path hint, if it looks like one
fn decode_path_hint(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    let utf16 = (data.len() % 2 == 0)
        .then(|| {
            let units = data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|u| *u != 0)
                .collect::<Vec<_>>();
            String::from_utf16(&units).ok()
        })
        .flatten();
    let text = utf16.or_else(|| {
        std::str::from_utf8(data)
            .ok()
            .map(|s| s.trim_end_matches('\0').to_string())
    })?;
    let looks_like_path = !text.is_empty()
        && text.chars().all(|c| c.is_ascii_graphic() || c == ' ')
        && (text.starts_with('\\') || text.to_ascii_lowercase().ends_with(".efi"));
    looks_like_path.then_some(text)
}
