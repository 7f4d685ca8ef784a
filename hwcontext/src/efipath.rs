// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! EFI device-path list codec.
//!
//! A device path is a chain of variable-length nodes, each framed by a
//! 4-byte header of type, sub-type and little-endian length, terminated by
//! an end-of-path node. Only the media records needed to locate a boot
//! image on a disk are decoded; everything else is carried verbatim.

use snafu::ensure;

use volumes::Volume;

use crate::{Error, InvalidDevicePathSnafu};

/// Media device path
const NODE_TYPE_MEDIA: u8 = 0x04;
/// End of the entire device path
const NODE_TYPE_END: u8 = 0x7F;

const SUBTYPE_HARD_DRIVE: u8 = 0x01;
const SUBTYPE_FILE_PATH: u8 = 0x04;
const SUBTYPE_END_ENTIRE: u8 = 0xFF;

/// Node header plus the fixed hard-drive record body
const HARD_DRIVE_NODE_LEN: usize = 42;

/// Media hard-drive record, locating one partition on one disk
#[derive(Debug, Clone, Eq)]
pub struct HardDrivePath {
    /// 1-based partition number
    pub partition_number: u32,
    /// Partition start, in 512-byte LBA units
    pub partition_start: u64,
    /// Partition size, in 512-byte LBA units
    pub partition_size: u64,
    /// Partition signature; the GPT unique GUID in mixed-endian layout
    pub signature: [u8; 16],
    pub partition_format: u8,
    pub signature_type: u8,
}

impl HardDrivePath {
    pub const FORMAT_MBR: u8 = 0x01;
    pub const FORMAT_GPT: u8 = 0x02;
    pub const SIGNATURE_TYPE_GUID: u8 = 0x02;

    /// Build the comparable record from a live volume's partition metadata
    pub fn from_volume(volume: &Volume) -> Result<Self, Error> {
        ensure!(
            volume.partition_number() > 0,
            InvalidDevicePathSnafu {
                reason: format!("volume {} has no partition metadata", volume.id()),
            }
        );
        Ok(Self {
            partition_number: volume.partition_number(),
            partition_start: volume.partition_start() / 512,
            partition_size: volume.size() / 512,
            signature: volume.partition_uuid().to_bytes_le(),
            partition_format: Self::FORMAT_GPT,
            signature_type: Self::SIGNATURE_TYPE_GUID,
        })
    }

    fn parse(body: &[u8]) -> Result<Self, Error> {
        ensure!(
            body.len() == HARD_DRIVE_NODE_LEN - 4,
            InvalidDevicePathSnafu {
                reason: format!("hard drive record is {} bytes", body.len()),
            }
        );
        let mut signature = [0u8; 16];
        signature.copy_from_slice(&body[20..36]);
        Ok(Self {
            partition_number: u32::from_le_bytes(body[0..4].try_into().expect("length checked")),
            partition_start: u64::from_le_bytes(body[4..12].try_into().expect("length checked")),
            partition_size: u64::from_le_bytes(body[12..20].try_into().expect("length checked")),
            signature,
            partition_format: body[36],
            signature_type: body[37],
        })
    }

    fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HARD_DRIVE_NODE_LEN - 4);
        out.extend_from_slice(&self.partition_number.to_le_bytes());
        out.extend_from_slice(&self.partition_start.to_le_bytes());
        out.extend_from_slice(&self.partition_size.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out.push(self.partition_format);
        out.push(self.signature_type);
        out
    }
}

impl PartialEq for HardDrivePath {
    /// Equality over the identifying fields; the format byte does not
    /// discriminate between otherwise identical records
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
            && self.partition_number == other.partition_number
            && self.partition_start == other.partition_start
            && self.partition_size == other.partition_size
            && self.signature_type == other.signature_type
    }
}

/// Media file-path record, a UTF-16LE path within a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePathNode {
    raw: Vec<u8>,
}

impl FilePathNode {
    /// Encode a path the firmware way, backslash separated and NUL terminated
    pub fn new(name: &str) -> Self {
        let mut raw = vec![];
        for unit in name.replace('/', "\\").encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        raw.extend_from_slice(&0u16.to_le_bytes());
        Self { raw }
    }

    /// Decode to a platform-native relative filename
    pub fn name(&self) -> Result<String, Error> {
        ensure!(
            self.raw.len() % 2 == 0,
            InvalidDevicePathSnafu {
                reason: "odd file path length",
            }
        );
        let units = self
            .raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|unit| *unit != 0)
            .collect::<Vec<_>>();
        let name = String::from_utf16(&units).map_err(|_| {
            InvalidDevicePathSnafu {
                reason: "file path is not UTF-16",
            }
            .build()
        })?;
        Ok(name.replace('\\', "/"))
    }
}

/// One decoded device-path node
#[derive(Debug, Clone, PartialEq)]
pub enum DevicePathNode {
    HardDrive(HardDrivePath),
    FilePath(FilePathNode),
    Other { node_type: u8, subtype: u8, data: Vec<u8> },
}

/// An ordered, terminated device-path list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePathList {
    nodes: Vec<DevicePathNode>,
}

impl DevicePathList {
    pub fn new(nodes: Vec<DevicePathNode>) -> Self {
        Self { nodes }
    }

    /// Decode a binary device-path list; stops at the end node
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let mut nodes = vec![];
        let mut offset = 0;
        while offset < data.len() {
            ensure!(
                data.len() - offset >= 4,
                InvalidDevicePathSnafu {
                    reason: "truncated node header",
                }
            );
            let node_type = data[offset];
            let subtype = data[offset + 1];
            let length = u16::from_le_bytes([data[offset + 2], data[offset + 3]]) as usize;
            ensure!(
                length >= 4 && offset + length <= data.len(),
                InvalidDevicePathSnafu {
                    reason: format!("node length {length} out of range"),
                }
            );
            let body = &data[offset + 4..offset + length];
            offset += length;

            if node_type == NODE_TYPE_END {
                break;
            }
            let node = match (node_type, subtype) {
                (NODE_TYPE_MEDIA, SUBTYPE_HARD_DRIVE) => DevicePathNode::HardDrive(HardDrivePath::parse(body)?),
                (NODE_TYPE_MEDIA, SUBTYPE_FILE_PATH) => DevicePathNode::FilePath(FilePathNode { raw: body.to_vec() }),
                _ => DevicePathNode::Other {
                    node_type,
                    subtype,
                    data: body.to_vec(),
                },
            };
            nodes.push(node);
        }
        Ok(Self { nodes })
    }

    /// Encode back to the binary layout, appending the end node
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![];
        for node in &self.nodes {
            let (node_type, subtype, body) = match node {
                DevicePathNode::HardDrive(hdd) => (NODE_TYPE_MEDIA, SUBTYPE_HARD_DRIVE, hdd.body()),
                DevicePathNode::FilePath(fp) => (NODE_TYPE_MEDIA, SUBTYPE_FILE_PATH, fp.raw.clone()),
                DevicePathNode::Other { node_type, subtype, data } => (*node_type, *subtype, data.clone()),
            };
            out.push(node_type);
            out.push(subtype);
            out.extend_from_slice(&((body.len() + 4) as u16).to_le_bytes());
            out.extend_from_slice(&body);
        }
        out.push(NODE_TYPE_END);
        out.push(SUBTYPE_END_ENTIRE);
        out.extend_from_slice(&4u16.to_le_bytes());
        out
    }

    pub fn nodes(&self) -> &[DevicePathNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The hard-drive record, if the list carries one
    pub fn hard_drive(&self) -> Option<&HardDrivePath> {
        self.nodes.iter().find_map(|n| match n {
            DevicePathNode::HardDrive(hdd) => Some(hdd),
            _ => None,
        })
    }

    /// The file-path record, if the list carries one
    pub fn file_path(&self) -> Option<&FilePathNode> {
        self.nodes.iter().find_map(|n| match n {
            DevicePathNode::FilePath(fp) => Some(fp),
            _ => None,
        })
    }
}
