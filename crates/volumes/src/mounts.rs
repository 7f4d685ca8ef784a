// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Parsed view of `/proc/self/mounts`

use std::path::Path;

use fs_err as fs;

/// One mount table row
#[derive(Debug, Clone)]
pub struct Mount {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
}

/// The process mount table
#[derive(Debug, Default)]
pub struct Table {
    mounts: Vec<Mount>,
}

impl Table {
    /// Parse the table from the given path, usually `/proc/self/mounts`
    pub fn new_from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = fs::read_to_string(path.as_ref())?;
        let mounts = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_ascii_whitespace();
                Some(Mount {
                    device: unescape_octal(fields.next()?),
                    mountpoint: unescape_octal(fields.next()?),
                    fstype: fields.next()?.to_string(),
                })
            })
            .collect();
        Ok(Self { mounts })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.iter()
    }

    /// Find the mountpoint of a device, if mounted
    pub fn mountpoint_for_device(&self, device: impl AsRef<Path>) -> Option<&str> {
        let device = device.as_ref();
        self.mounts
            .iter()
            .find(|m| Path::new(&m.device) == device)
            .map(|m| m.mountpoint.as_str())
    }
}

/// Reverse the `\040` style escapes the kernel applies to mount fields
fn unescape_octal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits = [chars.next(), chars.next(), chars.next()];
        match digits {
            [Some(a), Some(b), Some(c2)] if a.is_digit(8) && b.is_digit(8) && c2.is_digit(8) => {
                let code = (a.to_digit(8).unwrap() << 6) | (b.to_digit(8).unwrap() << 3) | c2.to_digit(8).unwrap();
                out.push(code as u8 as char);
            }
            _ => {
                out.push('\\');
                for d in digits.into_iter().flatten() {
                    out.push(d);
                }
            }
        }
    }
    out
}
