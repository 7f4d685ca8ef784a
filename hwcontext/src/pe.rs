// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Tolerant PE image loader.
//!
//! The boot-chain walker only needs to know that a file on the ESP really
//! is a PE executable, and to tell "not a PE at all" apart from "a PE with
//! broken headers". The walker swallows both; other callers may not.

use std::path::{Path, PathBuf};

use fs_err as fs;
use snafu::ensure;

use crate::{Error, FileNotFoundSnafu, PeInvalidSnafu, PeNotSupportedSnafu};

const DOS_MAGIC: [u8; 2] = *b"MZ";
const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
const DOS_HEADER_LEN: usize = 64;
const COFF_HEADER_LEN: usize = 20;

const OPTIONAL_MAGIC_PE32: u16 = 0x10B;
const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x20B;

/// A parsed PE image from an ESP
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeImage {
    filename: PathBuf,
    idx: u16,
    machine: u16,
    num_sections: u16,
}

impl PeImage {
    /// Load and parse the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return FileNotFoundSnafu { path }.fail();
            }
            Err(error) => return Err(error.into()),
        };
        let mut image = Self::parse_bytes(path, &data)?;
        image.filename = path.to_path_buf();
        Ok(image)
    }

    fn parse_bytes(path: &Path, data: &[u8]) -> Result<Self, Error> {
        ensure!(
            data.len() >= DOS_HEADER_LEN,
            PeInvalidSnafu {
                path,
                reason: format!("{} bytes is too small for a DOS header", data.len()),
            }
        );
        ensure!(
            data[0..2] == DOS_MAGIC,
            PeNotSupportedSnafu {
                path,
                reason: "missing MZ magic",
            }
        );

        let lfanew = u32::from_le_bytes(data[0x3C..0x40].try_into().expect("length checked")) as usize;
        ensure!(
            lfanew + PE_SIGNATURE.len() + COFF_HEADER_LEN <= data.len(),
            PeInvalidSnafu {
                path,
                reason: "PE header offset out of range",
            }
        );
        ensure!(
            data[lfanew..lfanew + 4] == PE_SIGNATURE,
            PeNotSupportedSnafu {
                path,
                reason: "missing PE signature",
            }
        );

        let coff = lfanew + PE_SIGNATURE.len();
        let machine = u16::from_le_bytes(data[coff..coff + 2].try_into().expect("length checked"));
        let num_sections = u16::from_le_bytes(data[coff + 2..coff + 4].try_into().expect("length checked"));
        let optional_len = u16::from_le_bytes(data[coff + 16..coff + 18].try_into().expect("length checked")) as usize;

        if optional_len > 0 {
            let optional = coff + COFF_HEADER_LEN;
            ensure!(
                optional + optional_len <= data.len() && optional_len >= 2,
                PeInvalidSnafu {
                    path,
                    reason: "truncated optional header",
                }
            );
            let magic = u16::from_le_bytes(data[optional..optional + 2].try_into().expect("length checked"));
            ensure!(
                magic == OPTIONAL_MAGIC_PE32 || magic == OPTIONAL_MAGIC_PE32_PLUS,
                PeInvalidSnafu {
                    path,
                    reason: format!("bad optional header magic {magic:#x}"),
                }
            );
        }

        Ok(Self {
            filename: PathBuf::new(),
            idx: 0,
            machine,
            num_sections,
        })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Boot entry number this image was resolved from
    pub fn idx(&self) -> u16 {
        self.idx
    }

    pub(crate) fn set_idx(&mut self, idx: u16) {
        self.idx = idx;
    }

    /// COFF machine field, e.g. 0x8664 for x86-64
    pub fn machine(&self) -> u16 {
        self.machine
    }

    pub fn num_sections(&self) -> u16 {
        self.num_sections
    }
}

impl crate::Firmware for PeImage {
    fn parse(&mut self, data: &[u8]) -> Result<(), Error> {
        let parsed = Self::parse_bytes(&self.filename, data)?;
        self.machine = parsed.machine;
        self.num_sections = parsed.num_sections;
        Ok(())
    }
}

/// Minimal but well-formed PE bytes
#[cfg(test)]
pub(crate) fn minimal_pe_bytes() -> Vec<u8> {
    let lfanew: u32 = 0x40;
    let mut data = vec![0u8; DOS_HEADER_LEN];
    data[0..2].copy_from_slice(&DOS_MAGIC);
    data[0x3C..0x40].copy_from_slice(&lfanew.to_le_bytes());
    data.extend_from_slice(&PE_SIGNATURE);
    let mut coff = [0u8; COFF_HEADER_LEN];
    coff[0..2].copy_from_slice(&0x8664u16.to_le_bytes()); // machine: x86-64
    coff[2..4].copy_from_slice(&1u16.to_le_bytes()); // one section
    data.extend_from_slice(&coff);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn write_temp(name: &str, data: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hwcontext-pe-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn loads_minimal_pe() {
        let path = write_temp("ok.efi", &minimal_pe_bytes());
        let image = PeImage::load(&path).unwrap();
        assert_eq!(image.machine(), 0x8664);
        assert_eq!(image.num_sections(), 1);
        assert_eq!(image.filename(), path);
        assert_eq!(image.idx(), 0);
    }

    #[test]
    fn wrong_magic_is_not_supported() {
        let mut data = minimal_pe_bytes();
        data[0] = b'X';
        let path = write_temp("notpe.efi", &data);
        assert_eq!(PeImage::load(&path).unwrap_err().kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn truncated_file_is_invalid() {
        let mut data = minimal_pe_bytes();
        data.truncate(70);
        let path = write_temp("short.efi", &data);
        assert_eq!(PeImage::load(&path).unwrap_err().kind(), ErrorKind::InvalidFile);
    }

    #[test]
    fn missing_pe_signature_is_not_supported() {
        let mut data = minimal_pe_bytes();
        data[0x40] = b'X';
        let path = write_temp("nosig.efi", &data);
        assert_eq!(PeImage::load(&path).unwrap_err().kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn missing_file_is_not_found() {
        let error = PeImage::load("/nonexistent/dir/shimx64.efi").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }
}
