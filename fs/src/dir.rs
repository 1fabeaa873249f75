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

use blockfs_ds::{DataStorage, BLOCK_SIZE};
use blockfs_err::{Error, FsError, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{EXECUTE, MAX_NAME_LEN, READ, TYPE_DIR, TYPE_FILE, WRITE};

pub const ENTRY_SIZE: usize = 64;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

/// The on-disk 64-byte directory entry: `name[56] | size(u32) | first_blk(u16)
/// | type(u8) | access_rights(u8)`, little-endian throughout.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirEntryRecord {
    name: [u8; 56],
    size: U32,
    first_blk: U16,
    kind: u8,
    access_rights: u8,
}

impl DirEntryRecord {
    pub fn new_file(name: &str, size: u32, first_blk: u16, access_rights: u8) -> Result<Self> {
        Self::new(name, TYPE_FILE, size, first_blk, access_rights)
    }

    pub fn new_dir(name: &str, first_blk: u16) -> Result<Self> {
        Self::new(name, TYPE_DIR, 0, first_blk, READ | WRITE | EXECUTE)
    }

    pub fn new(name: &str, kind: u8, size: u32, first_blk: u16, access_rights: u8) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return Err(Error::Fs(FsError::NameTooLong));
        }
        let mut name_field = [0u8; 56];
        name_field[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            name: name_field,
            size: U32::new(size),
            first_blk: U16::new(first_blk),
            kind,
            access_rights,
        })
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    pub fn name_str(&self) -> &str {
        core::str::from_utf8(self.name_bytes()).unwrap_or("")
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == TYPE_DIR
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = U32::new(size);
    }

    pub fn first_blk(&self) -> u16 {
        self.first_blk.get()
    }

    pub fn access_rights(&self) -> u8 {
        self.access_rights
    }

    pub fn set_access_rights(&mut self, rights: u8) {
        self.access_rights = rights;
    }

    pub fn has_rights(&self, mask: u8) -> bool {
        self.access_rights & mask == mask
    }

    /// Returns a copy of this entry with its name replaced, used by `mv`
    /// when relocating an entry into a different parent directory.
    pub fn with_name(&self, name: &str) -> Result<Self> {
        let mut copy = *self;
        copy.set_name(name)?;
        Ok(copy)
    }

    fn set_name(&mut self, name: &str) -> Result<()> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return Err(Error::Fs(FsError::NameTooLong));
        }
        self.name = [0u8; 56];
        self.name[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn decode(slot: &[u8]) -> Result<Self> {
        Self::read_from_bytes(slot).map_err(|_| Error::Fs(FsError::Inconsistent))
    }

    fn encode(&self, slot: &mut [u8]) -> Result<()> {
        self.write_to(slot).map_err(|_| Error::Fs(FsError::Inconsistent))
    }
}

/// Operates on a single directory block at a time, always reading the whole
/// block, mutating the relevant slot(s) in a local buffer, and writing the
/// whole block back.
pub struct DirectoryStore<'a, DS: DataStorage> {
    data_storage: &'a DS,
}

impl<'a, DS: DataStorage> DirectoryStore<'a, DS> {
    pub fn new(data_storage: &'a DS) -> Self {
        Self { data_storage }
    }

    fn read_block(&self, dir_block: u16) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.data_storage.read(dir_block as u32, &mut buf)?;
        Ok(buf)
    }

    fn write_block(&self, dir_block: u16, buf: &[u8]) -> Result<()> {
        self.data_storage.write(dir_block as u32, buf)
    }

    fn slot(buf: &[u8], index: usize) -> &[u8] {
        &buf[index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE]
    }

    fn slot_mut(buf: &mut [u8], index: usize) -> &mut [u8] {
        &mut buf[index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE]
    }

    /// Linear scan for the first non-empty slot whose name matches exactly.
    pub fn find(&self, dir_block: u16, name: &str) -> Result<Option<(usize, DirEntryRecord)>> {
        let buf = self.read_block(dir_block)?;
        for i in 0..ENTRIES_PER_BLOCK {
            let entry = DirEntryRecord::decode(Self::slot(&buf, i))?;
            if !entry.is_free() && entry.name_str() == name {
                return Ok(Some((i, entry)));
            }
        }
        Ok(None)
    }

    /// Places `entry` in the lowest-indexed free slot. Rejects a name
    /// collision against any other occupied slot.
    pub fn insert(&self, dir_block: u16, entry: &DirEntryRecord) -> Result<()> {
        let mut buf = self.read_block(dir_block)?;
        let name = entry.name_str();
        let mut free_slot = None;
        for i in 0..ENTRIES_PER_BLOCK {
            let existing = DirEntryRecord::decode(Self::slot(&buf, i))?;
            if existing.is_free() {
                free_slot.get_or_insert(i);
            } else if existing.name_str() == name {
                return Err(Error::Fs(FsError::Duplicate));
            }
        }
        let slot = free_slot.ok_or(Error::Fs(FsError::DirectoryFull))?;
        entry.encode(Self::slot_mut(&mut buf, slot))?;
        self.write_block(dir_block, &buf)
    }

    /// Zeroes the matching slot.
    pub fn remove(&self, dir_block: u16, name: &str) -> Result<()> {
        let mut buf = self.read_block(dir_block)?;
        for i in 0..ENTRIES_PER_BLOCK {
            let existing = DirEntryRecord::decode(Self::slot(&buf, i))?;
            if !existing.is_free() && existing.name_str() == name {
                Self::slot_mut(&mut buf, i).fill(0);
                return self.write_block(dir_block, &buf);
            }
        }
        Err(Error::Fs(FsError::NotFound))
    }

    pub fn enumerate(&self, dir_block: u16) -> Result<Vec<DirEntryRecord>> {
        let buf = self.read_block(dir_block)?;
        let mut entries = Vec::new();
        for i in 0..ENTRIES_PER_BLOCK {
            let entry = DirEntryRecord::decode(Self::slot(&buf, i))?;
            if !entry.is_free() {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Overwrites an already-located slot in place, used by `mv` (in-place
    /// rename), `append` (size growth) and `chmod` (access-rights change).
    pub fn write_slot(&self, dir_block: u16, slot: usize, entry: &DirEntryRecord) -> Result<()> {
        let mut buf = self.read_block(dir_block)?;
        entry.encode(Self::slot_mut(&mut buf, slot))?;
        self.write_block(dir_block, &buf)
    }

    /// Renames the entry at `slot` in place, checking for a name collision
    /// against every other occupied slot first.
    pub fn rename_slot(&self, dir_block: u16, slot: usize, new_name: &str) -> Result<()> {
        let mut buf = self.read_block(dir_block)?;
        for i in 0..ENTRIES_PER_BLOCK {
            if i == slot {
                continue;
            }
            let existing = DirEntryRecord::decode(Self::slot(&buf, i))?;
            if !existing.is_free() && existing.name_str() == new_name {
                return Err(Error::Fs(FsError::Duplicate));
            }
        }
        let mut entry = DirEntryRecord::decode(Self::slot(&buf, slot))?;
        entry.set_name(new_name)?;
        entry.encode(Self::slot_mut(&mut buf, slot))?;
        self.write_block(dir_block, &buf)
    }

    /// Writes `.` and `..` into a freshly allocated, otherwise-zero
    /// directory block.
    pub fn init_directory_block(&self, dir_block: u16, parent_block: u16) -> Result<()> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        let dot = DirEntryRecord::new_dir(".", dir_block)?;
        let dotdot = DirEntryRecord::new_dir("..", parent_block)?;
        dot.encode(Self::slot_mut(&mut buf, 0))?;
        dotdot.encode(Self::slot_mut(&mut buf, 1))?;
        self.write_block(dir_block, &buf)
    }

    /// True iff every slot beyond `.`/`..` (indices 0 and 1) is free. Only
    /// meaningful for non-root directory blocks, since the root has no
    /// `.`/`..` entries and reserves no slots.
    pub fn is_empty(&self, dir_block: u16) -> Result<bool> {
        let buf = self.read_block(dir_block)?;
        for i in 2..ENTRIES_PER_BLOCK {
            let entry = DirEntryRecord::decode(Self::slot(&buf, i))?;
            if !entry.is_free() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use blockfs_ds::testing::MemoryBlockDevice;

    use super::*;

    #[test]
    fn insert_find_remove_round_trip() {
        let device = MemoryBlockDevice::new(4);
        let store = DirectoryStore::new(&device);
        let entry = DirEntryRecord::new_file("hello", 3, 5, READ | WRITE).unwrap();
        store.insert(0, &entry).unwrap();

        let (slot, found) = store.find(0, "hello").unwrap().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(found.size(), 3);

        store.remove(0, "hello").unwrap();
        assert!(store.find(0, "hello").unwrap().is_none());
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let device = MemoryBlockDevice::new(4);
        let store = DirectoryStore::new(&device);
        let entry = DirEntryRecord::new_file("a", 0, 2, READ).unwrap();
        store.insert(0, &entry).unwrap();
        let err = store.insert(0, &entry);
        assert!(matches!(err, Err(Error::Fs(FsError::Duplicate))));
    }

    #[test]
    fn insert_rejects_full_directory() {
        let device = MemoryBlockDevice::new(4);
        let store = DirectoryStore::new(&device);
        for i in 0..ENTRIES_PER_BLOCK {
            let entry = DirEntryRecord::new_file(&format!("f{i}"), 0, 2, READ).unwrap();
            store.insert(0, &entry).unwrap();
        }
        let overflow = DirEntryRecord::new_file("one-too-many", 0, 2, READ).unwrap();
        assert!(matches!(
            store.insert(0, &overflow),
            Err(Error::Fs(FsError::DirectoryFull))
        ));
    }

    #[test]
    fn enumerate_skips_free_slots() {
        let device = MemoryBlockDevice::new(4);
        let store = DirectoryStore::new(&device);
        store.insert(0, &DirEntryRecord::new_file("a", 0, 2, READ).unwrap()).unwrap();
        store.insert(0, &DirEntryRecord::new_file("b", 0, 3, READ).unwrap()).unwrap();
        store.remove(0, "a").unwrap();
        let entries: Vec<_> = store.enumerate(0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name_str(), "b");
    }

    #[test]
    fn is_empty_ignores_dot_and_dotdot() {
        let device = MemoryBlockDevice::new(4);
        let store = DirectoryStore::new(&device);
        store.init_directory_block(0, 0).unwrap();
        assert!(store.is_empty(0).unwrap());
        store.insert(0, &DirEntryRecord::new_file("x", 0, 2, READ).unwrap()).unwrap();
        assert!(!store.is_empty(0).unwrap());
    }
}
