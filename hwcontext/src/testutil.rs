// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for the unit test suites

use std::cell::Cell;
use std::rc::Rc;

use volumes::{BlockDevice, Inventory, PartitionKind, Volume};

use crate::events::ChangeEvent;

/// An inventory serving canned volumes and block devices
#[derive(Default)]
pub(crate) struct MockInventory {
    volumes: Vec<Rc<Volume>>,
    block_devices: Vec<BlockDevice>,
    fail_volumes: bool,
    fail_block_devices: bool,
}

impl MockInventory {
    pub fn with_volumes(self, volumes: Vec<Rc<Volume>>) -> Self {
        Self { volumes, ..self }
    }

    pub fn with_block_devices(self, block_devices: Vec<BlockDevice>) -> Self {
        Self { block_devices, ..self }
    }

    pub fn failing_volumes(self) -> Self {
        Self {
            fail_volumes: true,
            ..self
        }
    }

    pub fn failing_block_devices(self) -> Self {
        Self {
            fail_block_devices: true,
            ..self
        }
    }
}

fn service_down() -> volumes::Error {
    volumes::Error::Io {
        source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "block device service down"),
    }
}

impl Inventory for MockInventory {
    fn volumes_by_kind(&self, kind: PartitionKind) -> Result<Vec<Rc<Volume>>, volumes::Error> {
        if self.fail_volumes {
            return Err(service_down());
        }
        Ok(self
            .volumes
            .iter()
            .filter(|v| v.partition_kind() == kind)
            .cloned()
            .collect())
    }

    fn block_devices(&self) -> Result<Vec<BlockDevice>, volumes::Error> {
        if self.fail_block_devices {
            return Err(service_down());
        }
        Ok(self.block_devices.clone())
    }
}

/// A change listener that only counts invocations
pub(crate) fn counting_listener() -> (Rc<Cell<usize>>, Box<dyn Fn(&ChangeEvent)>) {
    let count = Rc::new(Cell::new(0usize));
    let listener = {
        let count = count.clone();
        Box::new(move |_: &ChangeEvent| count.set(count.get() + 1))
    };
    (count, listener)
}
