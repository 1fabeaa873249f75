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

use blockfs_ds::{DataStorage, BLOCK_COUNT, BLOCK_SIZE};
use blockfs_err::{Error, FsError, Result};

use crate::{FAT_BLOCK, FAT_EOF, FAT_FREE, ROOT_BLOCK};

/// The in-memory File Allocation Table: one signed 16-bit successor per
/// block, kept fully materialized and rewritten to `FAT_BLOCK` in whole on
/// every mutating operation.
pub struct FatAllocator {
    entries: Vec<i16>,
}

impl FatAllocator {
    /// An all-free table with only the reserved blocks closed off. Does not
    /// touch the device; callers persist it themselves.
    pub fn empty() -> Self {
        let mut entries = vec![FAT_FREE; BLOCK_COUNT];
        entries[ROOT_BLOCK as usize] = FAT_EOF;
        entries[FAT_BLOCK as usize] = FAT_EOF;
        Self { entries }
    }

    pub fn reset(&mut self) {
        *self = Self::empty();
    }

    /// Reads `FAT_BLOCK` off `data_storage` and decodes it as little-endian
    /// `i16`s.
    pub fn load<DS: DataStorage>(data_storage: &DS) -> Result<Self> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        data_storage.read(FAT_BLOCK as u32, &mut buf)?;
        let entries = buf
            .chunks_exact(2)
            .take(BLOCK_COUNT)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Ok(Self { entries })
    }

    /// Cheap sanity check used by `mount` to decide whether the device
    /// already carries a formatted filesystem.
    pub fn looks_valid(&self) -> bool {
        self.entries.len() == BLOCK_COUNT
            && self.entries[ROOT_BLOCK as usize] == FAT_EOF
            && self.entries[FAT_BLOCK as usize] == FAT_EOF
    }

    pub fn persist<DS: DataStorage>(&self, data_storage: &DS) -> Result<()> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        for (i, entry) in self.entries.iter().enumerate() {
            let bytes = entry.to_le_bytes();
            buf[i * 2] = bytes[0];
            buf[i * 2 + 1] = bytes[1];
        }
        data_storage.write(FAT_BLOCK as u32, &buf)
    }

    /// Scans `2..BLOCK_COUNT` in ascending order for the first `FAT_FREE`
    /// slot, closes it as a one-block chain and returns its index. The scan
    /// order is load-bearing: tests rely on lowest-free-first allocation.
    pub fn allocate_one(&mut self) -> Result<u16> {
        for i in 2..self.entries.len() {
            if self.entries[i] == FAT_FREE {
                self.entries[i] = FAT_EOF;
                return Ok(i as u16);
            }
        }
        Err(Error::Fs(FsError::NoSpace))
    }

    /// Allocates `count` blocks and links them into a single chain, lowest
    /// indices first. Rolls every block back to `FAT_FREE` if the device
    /// runs out partway, so a `NoSpace` here never leaks a slot.
    pub fn allocate_chain(&mut self, count: usize) -> Result<Vec<u16>> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_one() {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    for block in &blocks {
                        self.entries[*block as usize] = FAT_FREE;
                    }
                    return Err(err);
                }
            }
        }
        for pair in blocks.windows(2) {
            self.entries[pair[0] as usize] = pair[1] as i16;
        }
        Ok(blocks)
    }

    /// Appends `next` after `tail`, which must currently be `FAT_EOF`. Used
    /// by `append` to extend an existing chain.
    pub fn link_tail(&mut self, tail: u16, next: u16) {
        self.entries[tail as usize] = next as i16;
    }

    pub fn chain_next(&self, block: u16) -> Option<u16> {
        match self.entries[block as usize] {
            FAT_EOF => None,
            next => Some(next as u16),
        }
    }

    /// Walks the chain from `start`, setting every visited slot to
    /// `FAT_FREE`.
    pub fn free_chain(&mut self, start: u16) {
        let mut current = Some(start);
        while let Some(block) = current {
            current = self.chain_next(block);
            self.entries[block as usize] = FAT_FREE;
        }
    }

    /// Iterates the block numbers of the chain starting at `start`, in
    /// order. Defensively bounded so on-disk corruption producing a cycle
    /// can't hang the caller.
    pub fn chain(&self, start: u16) -> Chain<'_> {
        Chain {
            fat: self,
            current: Some(start),
            steps: 0,
        }
    }
}

pub struct Chain<'a> {
    fat: &'a FatAllocator,
    current: Option<u16>,
    steps: usize,
}

impl Iterator for Chain<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let block = self.current?;
        self.steps += 1;
        if self.steps > BLOCK_COUNT {
            log::error!("FAT chain starting at {block} did not terminate within BLOCK_COUNT steps");
            self.current = None;
            return None;
        }
        self.current = self.fat.chain_next(block);
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use blockfs_ds::testing::MemoryBlockDevice;

    use super::*;

    #[test]
    fn allocate_one_picks_lowest_free_index() {
        let mut fat = FatAllocator::empty();
        assert_eq!(fat.allocate_one().unwrap(), 2);
        assert_eq!(fat.allocate_one().unwrap(), 3);
        fat.free_chain(2);
        assert_eq!(fat.allocate_one().unwrap(), 2);
    }

    #[test]
    fn allocate_chain_links_blocks_and_terminates() {
        let mut fat = FatAllocator::empty();
        let blocks = fat.allocate_chain(3).unwrap();
        assert_eq!(blocks, vec![2, 3, 4]);
        assert_eq!(fat.chain_next(2), Some(3));
        assert_eq!(fat.chain_next(3), Some(4));
        assert_eq!(fat.chain_next(4), None);
        assert_eq!(fat.chain(2).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn allocate_chain_rolls_back_on_no_space() {
        let mut fat = FatAllocator::empty();
        let total_free = BLOCK_COUNT - 2;
        let err = fat.allocate_chain(total_free + 1);
        assert!(matches!(err, Err(Error::Fs(FsError::NoSpace))));
        // every block should still be free, i.e. re-allocatable exactly as before
        let blocks = fat.allocate_chain(total_free).unwrap();
        assert_eq!(blocks.len(), total_free);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let device = MemoryBlockDevice::new(BLOCK_COUNT);
        let mut fat = FatAllocator::empty();
        fat.allocate_chain(2).unwrap();
        fat.persist(&device).unwrap();

        let loaded = FatAllocator::load(&device).unwrap();
        assert!(loaded.looks_valid());
        assert_eq!(loaded.chain_next(2), Some(3));
        assert_eq!(loaded.chain_next(3), None);
    }
}
