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

pub use blockfs_err::{Error, IoError, Result};

/// Bytes per block. Fixed at compile time: the on-disk layout has no
/// superblock field that would carry it.
pub const BLOCK_SIZE: usize = 4096;

/// Total number of addressable blocks. Chosen as the largest value for
/// which the whole FAT still fits in the single `FAT_BLOCK`.
pub const BLOCK_COUNT: usize = BLOCK_SIZE / 2;

/// A fixed-geometry, block-addressed raw storage device.
///
/// Implementations transfer exactly [`BLOCK_SIZE`] bytes per call and hold
/// no cache of their own; every `read`/`write` goes to the backing medium.
pub trait DataStorage {
    fn block_count(&self) -> u32 {
        BLOCK_COUNT as u32
    }

    fn read(&self, block_no: u32, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, block_no: u32, buffer: &[u8]) -> Result<()>;
}

/// Range-checks `block_no` against `block_count`, returning [`IoError::OutOfRange`]
/// if it doesn't address a block on the device.
///
/// Implementations of [`DataStorage`] should call this before touching the
/// backing medium so every backend rejects an out-of-range block the same way.
pub fn check_block_no(block_no: u32, block_count: u32) -> Result<()> {
    if block_no >= block_count {
        return Err(Error::Io(IoError::OutOfRange(block_no)));
    }
    Ok(())
}

/// An in-memory [`DataStorage`], used by `blockfs_fs`'s own tests and
/// available to downstream crates under the `test-util` feature so they
/// don't need a real file to exercise FAT/directory logic.
#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use std::cell::RefCell;

    pub struct MemoryBlockDevice {
        blocks: RefCell<Vec<Vec<u8>>>,
    }

    impl MemoryBlockDevice {
        pub fn new(block_count: usize) -> Self {
            Self {
                blocks: RefCell::new(vec![vec![0u8; BLOCK_SIZE]; block_count]),
            }
        }
    }

    impl DataStorage for MemoryBlockDevice {
        fn block_count(&self) -> u32 {
            self.blocks.borrow().len() as u32
        }

        fn read(&self, block_no: u32, buffer: &mut [u8]) -> Result<()> {
            check_block_no(block_no, self.block_count())?;
            buffer.copy_from_slice(&self.blocks.borrow()[block_no as usize]);
            Ok(())
        }

        fn write(&self, block_no: u32, buffer: &[u8]) -> Result<()> {
            check_block_no(block_no, self.block_count())?;
            self.blocks.borrow_mut()[block_no as usize].copy_from_slice(buffer);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryBlockDevice;
    use super::*;

    #[test]
    fn read_after_write_round_trips() {
        let device = MemoryBlockDevice::new(4);
        let mut payload = vec![0u8; BLOCK_SIZE];
        payload[0] = 0xAB;
        device.write(2, &payload).unwrap();

        let mut out = vec![0u8; BLOCK_SIZE];
        device.read(2, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let device = MemoryBlockDevice::new(4);
        let mut out = vec![0u8; BLOCK_SIZE];
        assert!(matches!(
            device.read(4, &mut out),
            Err(Error::Io(IoError::OutOfRange(4)))
        ));
    }
}
