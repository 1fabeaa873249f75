// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::Path,
};

use blockfs_ds::{check_block_no, DataStorage, BLOCK_COUNT, BLOCK_SIZE};
use blockfs_err::{Error, IoError, Result};
use log::info;

/// A [`DataStorage`] backed by a single regular file, block-addressed
/// rather than byte-offset-addressed: callers pass a block number and this
/// device computes `block_no * BLOCK_SIZE` itself and range-checks it.
pub struct FileBlockDevice {
    file: File,
    block_count: u32,
}

impl FileBlockDevice {
    /// Opens an existing backing file. Its length must already be a whole
    /// number of blocks; the device exposes `len / BLOCK_SIZE` blocks,
    /// capped at [`BLOCK_COUNT`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Io(IoError::Device(e)))?;
        let len = file
            .metadata()
            .map_err(|e| Error::Io(IoError::Device(e)))?
            .len();
        let block_count = ((len / BLOCK_SIZE as u64) as u32).min(BLOCK_COUNT as u32);
        Ok(Self { file, block_count })
    }

    /// Creates a fresh, zero-filled backing file of exactly
    /// `BLOCK_COUNT * BLOCK_SIZE` bytes, truncating any file already at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::Io(IoError::Device(e)))?;
        file.set_len((BLOCK_COUNT * BLOCK_SIZE) as u64)
            .map_err(|e| Error::Io(IoError::Device(e)))?;
        info!("created {}-block backing file", BLOCK_COUNT);
        Ok(Self {
            file,
            block_count: BLOCK_COUNT as u32,
        })
    }

    /// Opens `path` if it already has the full-size geometry, otherwise
    /// creates a fresh backing file there.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(device) if device.block_count as usize == BLOCK_COUNT => Ok(device),
            _ => Self::create(path),
        }
    }
}

impl DataStorage for FileBlockDevice {
    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read(&self, block_no: u32, buffer: &mut [u8]) -> Result<()> {
        check_block_no(block_no, self.block_count)?;
        self.file
            .read_exact_at(buffer, block_no as u64 * BLOCK_SIZE as u64)
            .map_err(|e| Error::Io(IoError::Device(e)))
    }

    fn write(&self, block_no: u32, buffer: &[u8]) -> Result<()> {
        check_block_no(block_no, self.block_count)?;
        self.file
            .write_all_at(buffer, block_no as u64 * BLOCK_SIZE as u64)
            .map_err(|e| Error::Io(IoError::Device(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_round_trips_a_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockfs.img");

        {
            let device = FileBlockDevice::create(&path).unwrap();
            assert_eq!(device.block_count(), BLOCK_COUNT as u32);
            let mut payload = vec![0u8; BLOCK_SIZE];
            payload[4] = 0x42;
            device.write(3, &payload).unwrap();
        }

        let device = FileBlockDevice::open(&path).unwrap();
        let mut out = vec![0u8; BLOCK_SIZE];
        device.read(3, &mut out).unwrap();
        assert_eq!(out[4], 0x42);
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockfs.img");
        let device = FileBlockDevice::create(&path).unwrap();
        let mut out = vec![0u8; BLOCK_SIZE];
        assert!(matches!(
            device.read(BLOCK_COUNT as u32, &mut out),
            Err(Error::Io(IoError::OutOfRange(_)))
        ));
    }

    #[test]
    fn open_or_create_creates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.img");
        assert!(!path.exists());
        let device = FileBlockDevice::open_or_create(&path).unwrap();
        assert_eq!(device.block_count(), BLOCK_COUNT as u32);
        assert!(path.exists());
    }
}
