// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory variable store, for self tests and `FWUPD_EFIVARS=dummy`

use super::{Efivars, LoadOption};
use crate::{Error, NoBootEntrySnafu};

/// A variable store that never touches the system
#[derive(Debug)]
pub struct DummyEfivars {
    space_free: u64,
    entries: Vec<LoadOption>,
}

impl Default for DummyEfivars {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyEfivars {
    pub fn new() -> Self {
        Self {
            space_free: u64::MAX,
            entries: vec![],
        }
    }

    pub fn set_space_free(&mut self, bytes: u64) {
        self.space_free = bytes;
    }

    /// Append an entry; the boot order follows insertion order
    pub fn add_boot_entry(&mut self, entry: LoadOption) {
        self.entries.push(entry);
    }
}

impl Efivars for DummyEfivars {
    fn space_free(&self) -> Result<u64, Error> {
        Ok(self.space_free)
    }

    fn boot_order(&self) -> Result<Vec<u16>, Error> {
        Ok(self.entries.iter().map(|e| e.idx()).collect())
    }

    fn boot_entry(&self, idx: u16) -> Result<LoadOption, Error> {
        self.entries
            .iter()
            .find(|e| e.idx() == idx)
            .cloned()
            .ok_or_else(|| NoBootEntrySnafu { idx }.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_entry_order() {
        let mut efivars = DummyEfivars::new();
        efivars.add_boot_entry(LoadOption::new(3, "third"));
        efivars.add_boot_entry(LoadOption::new(0, "zeroth"));
        assert_eq!(efivars.boot_order().unwrap(), vec![3, 0]);
        let entries = efivars.boot_entries().unwrap();
        assert_eq!(entries[0].description(), "third");
        assert_eq!(entries[1].description(), "zeroth");
    }
}
