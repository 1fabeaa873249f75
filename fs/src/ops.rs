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

use std::io::{BufRead, Write};

use blockfs_ds::{DataStorage, BLOCK_SIZE};
use blockfs_err::{Error, FsError, IoError, Result};

use crate::dir::{DirEntryRecord, DirectoryStore};
use crate::fat::FatAllocator;
use crate::{path, MAX_NAME_LEN, READ, ROOT_BLOCK, WRITE};

/// A mounted filesystem over a single [`DataStorage`] backend. Owns the
/// in-memory FAT and the current working directory; every method that
/// touches allocation or linkage persists the FAT before returning `Ok`.
pub struct Filesystem<DS: DataStorage> {
    data_storage: DS,
    fat: FatAllocator,
    cwd: u16,
}

impl<DS: DataStorage> Filesystem<DS> {
    /// Loads the FAT off `data_storage`; formats fresh if it doesn't look
    /// like a valid one (uninitialized device, or a read failure).
    pub fn mount(data_storage: DS) -> Result<Self> {
        let loaded = FatAllocator::load(&data_storage)
            .ok()
            .filter(FatAllocator::looks_valid);
        match loaded {
            Some(fat) => Ok(Self {
                data_storage,
                fat,
                cwd: ROOT_BLOCK,
            }),
            None => {
                let mut fs = Self {
                    data_storage,
                    fat: FatAllocator::empty(),
                    cwd: ROOT_BLOCK,
                };
                fs.format()?;
                Ok(fs)
            }
        }
    }

    pub fn cwd(&self) -> u16 {
        self.cwd
    }

    fn dir_store(&self) -> DirectoryStore<'_, DS> {
        DirectoryStore::new(&self.data_storage)
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            Err(Error::Fs(FsError::NotFound))
        } else if name.len() > MAX_NAME_LEN {
            Err(Error::Fs(FsError::NameTooLong))
        } else {
            Ok(())
        }
    }

    /// `resolve(path) -> (parent_dir_block, final_name)`: descends into
    /// every component but the last (which must exist and be a directory),
    /// and returns the unresolved final component. A trailing slash or an
    /// all-`.`/empty path folds the last component into the descent too,
    /// yielding an empty final name.
    pub fn resolve(&self, path: &str) -> Result<(u16, String)> {
        let (is_absolute, components, trailing_slash) = path::split(path);
        let mut current = if is_absolute { ROOT_BLOCK } else { self.cwd };
        if components.is_empty() {
            return Ok((current, String::new()));
        }
        let last = components.len() - 1;
        for (i, comp) in components.iter().enumerate() {
            if i == last && !trailing_slash {
                return Ok((current, (*comp).to_string()));
            }
            current = self.descend(current, comp)?;
        }
        Ok((current, String::new()))
    }

    fn descend(&self, dir_block: u16, comp: &str) -> Result<u16> {
        if comp == ".." {
            return self.parent_of(dir_block);
        }
        let (_, entry) = self
            .dir_store()
            .find(dir_block, comp)?
            .ok_or(Error::Fs(FsError::PathNotFound))?;
        if !entry.is_dir() {
            return Err(Error::Fs(FsError::PathNotFound));
        }
        Ok(entry.first_blk())
    }

    fn parent_of(&self, dir_block: u16) -> Result<u16> {
        if dir_block == ROOT_BLOCK {
            return Ok(ROOT_BLOCK);
        }
        let (_, entry) = self
            .dir_store()
            .find(dir_block, "..")?
            .ok_or(Error::Fs(FsError::Inconsistent))?;
        Ok(entry.first_blk())
    }

    /// Like [`Self::resolve`], but descends through every component
    /// including the last, which must name an existing directory. Used by
    /// `cd` and by `cp`/`mv` to test whether a destination path already
    /// names a directory to copy/move into.
    fn resolve_existing_dir(&self, path: &str) -> Result<u16> {
        let (is_absolute, components, _trailing_slash) = path::split(path);
        let mut current = if is_absolute { ROOT_BLOCK } else { self.cwd };
        if components.is_empty() {
            return Ok(current);
        }
        let last = components.len() - 1;
        for (i, comp) in components.iter().enumerate() {
            if *comp == ".." {
                current = self.parent_of(current)?;
                continue;
            }
            match self.dir_store().find(current, comp)? {
                None => return Err(Error::Fs(FsError::PathNotFound)),
                Some((_, entry)) => {
                    if !entry.is_dir() {
                        return Err(Error::Fs(if i == last {
                            FsError::NotADirectory
                        } else {
                            FsError::PathNotFound
                        }));
                    }
                    current = entry.first_blk();
                }
            }
        }
        Ok(current)
    }

    /// Resolves a `cp`/`mv` destination: if it already names a directory,
    /// the entry goes inside it under `fallback_name`; otherwise it's a
    /// plain `(parent, name)` pair from [`Self::resolve`].
    fn resolve_insertion_point(&self, dst: &str, fallback_name: &str) -> Result<(u16, String)> {
        if let Ok(dir_block) = self.resolve_existing_dir(dst) {
            return Ok((dir_block, fallback_name.to_string()));
        }
        let (parent, name) = self.resolve(dst)?;
        Self::validate_name(&name)?;
        Ok((parent, name))
    }

    fn write_new_chain(&mut self, payload: &[u8]) -> Result<u16> {
        let block_count = if payload.is_empty() {
            1
        } else {
            payload.len().div_ceil(BLOCK_SIZE)
        };
        let blocks = self.fat.allocate_chain(block_count)?;
        for (i, &block) in blocks.iter().enumerate() {
            let start = i * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(payload.len());
            let mut buf = vec![0u8; BLOCK_SIZE];
            if start < end {
                buf[..end - start].copy_from_slice(&payload[start..end]);
            }
            self.data_storage.write(block as u32, &buf)?;
        }
        Ok(blocks[0])
    }

    fn read_chain(&self, first_blk: u16, size: u32) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; size as usize];
        let mut remaining = size as usize;
        let mut offset = 0;
        for block in self.fat.chain(first_blk) {
            if remaining == 0 {
                break;
            }
            let mut buf = vec![0u8; BLOCK_SIZE];
            self.data_storage.read(block as u32, &mut buf)?;
            let take = remaining.min(BLOCK_SIZE);
            payload[offset..offset + take].copy_from_slice(&buf[..take]);
            offset += take;
            remaining -= take;
        }
        Ok(payload)
    }

    /// Reinitializes the FAT and zeroes the root directory block, then
    /// resets the current directory to the root.
    pub fn format(&mut self) -> Result<()> {
        self.fat.reset();
        self.fat.persist(&self.data_storage)?;
        self.data_storage.write(ROOT_BLOCK as u32, &vec![0u8; BLOCK_SIZE])?;
        self.cwd = ROOT_BLOCK;
        Ok(())
    }

    /// Reads payload lines from `input` until a blank line, then creates a
    /// new file at `path` holding that payload.
    pub fn create<R: BufRead>(&mut self, path: &str, input: &mut R) -> Result<()> {
        let (parent, name) = self.resolve(path)?;
        Self::validate_name(&name)?;

        let mut payload = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = input
                .read_line(&mut line)
                .map_err(|e| Error::Io(IoError::Device(e)))?;
            if read == 0 {
                break;
            }
            let trimmed = line.strip_suffix('\n').unwrap_or(&line);
            let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
            if trimmed.is_empty() {
                break;
            }
            payload.extend_from_slice(trimmed.as_bytes());
            payload.push(b'\n');
        }

        let first_blk = self.write_new_chain(&payload)?;
        let entry = DirEntryRecord::new_file(&name, payload.len() as u32, first_blk, READ | WRITE)?;
        if let Err(err) = self.dir_store().insert(parent, &entry) {
            self.fat.free_chain(first_blk);
            self.fat.persist(&self.data_storage)?;
            return Err(err);
        }
        self.fat.persist(&self.data_storage)
    }

    /// Writes exactly the file's `size` bytes to `out`.
    pub fn cat<W: Write>(&self, path: &str, out: &mut W) -> Result<()> {
        let (parent, name) = self.resolve(path)?;
        if name.is_empty() {
            return Err(Error::Fs(FsError::NotFound));
        }
        let (_, entry) = self
            .dir_store()
            .find(parent, &name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        if entry.is_dir() {
            return Err(Error::Fs(FsError::IsDirectory));
        }
        if !entry.has_rights(READ) {
            return Err(Error::Fs(FsError::PermissionDenied));
        }
        let mut remaining = entry.size() as usize;
        for block in self.fat.chain(entry.first_blk()) {
            if remaining == 0 {
                break;
            }
            let mut buf = vec![0u8; BLOCK_SIZE];
            self.data_storage.read(block as u32, &mut buf)?;
            let take = remaining.min(BLOCK_SIZE);
            out.write_all(&buf[..take])
                .map_err(|e| Error::Io(IoError::Device(e)))?;
            remaining -= take;
        }
        Ok(())
    }

    /// Lists the current directory, `.`/`..` excluded, sorted by name.
    pub fn ls<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut entries: Vec<_> = self
            .dir_store()
            .enumerate(self.cwd)?
            .into_iter()
            .filter(|e| e.name_str() != "." && e.name_str() != "..")
            .collect();
        entries.sort_by(|a, b| a.name_bytes().cmp(b.name_bytes()));

        writeln!(out, "name\t type\t accessrights\t size").map_err(|e| Error::Io(IoError::Device(e)))?;
        for entry in entries {
            let kind = if entry.is_dir() { "dir" } else { "file" };
            let rights = format!(
                "{}{}{}",
                if entry.has_rights(READ) { 'r' } else { '-' },
                if entry.has_rights(WRITE) { 'w' } else { '-' },
                if entry.has_rights(crate::EXECUTE) { 'x' } else { '-' },
            );
            let size = if entry.is_dir() {
                "-".to_string()
            } else {
                entry.size().to_string()
            };
            writeln!(out, "{}\t {}\t {}\t {}", entry.name_str(), kind, rights, size)
                .map_err(|e| Error::Io(IoError::Device(e)))?;
        }
        Ok(())
    }

    pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
        let (src_parent, src_name) = self.resolve(src)?;
        if src_name.is_empty() {
            return Err(Error::Fs(FsError::NotFound));
        }
        let (_, src_entry) = self
            .dir_store()
            .find(src_parent, &src_name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        if src_entry.is_dir() {
            return Err(Error::Fs(FsError::IsDirectory));
        }

        let (dst_parent, dst_name) = self.resolve_insertion_point(dst, &src_name)?;
        let payload = self.read_chain(src_entry.first_blk(), src_entry.size())?;
        let first_blk = self.write_new_chain(&payload)?;
        let new_entry = DirEntryRecord::new(
            &dst_name,
            src_entry.kind(),
            payload.len() as u32,
            first_blk,
            src_entry.access_rights(),
        )?;
        if let Err(err) = self.dir_store().insert(dst_parent, &new_entry) {
            self.fat.free_chain(first_blk);
            self.fat.persist(&self.data_storage)?;
            return Err(err);
        }
        self.fat.persist(&self.data_storage)
    }

    pub fn mv(&mut self, src: &str, dst: &str) -> Result<()> {
        let (src_parent, src_name) = self.resolve(src)?;
        if src_name.is_empty() {
            return Err(Error::Fs(FsError::NotFound));
        }
        let (src_slot, src_entry) = self
            .dir_store()
            .find(src_parent, &src_name)?
            .ok_or(Error::Fs(FsError::NotFound))?;

        if let Ok(dst_dir) = self.resolve_existing_dir(dst) {
            self.dir_store().insert(dst_dir, &src_entry)?;
            return self.dir_store().remove(src_parent, &src_name);
        }

        let (dst_parent, dst_name) = self.resolve(dst)?;
        Self::validate_name(&dst_name)?;

        if dst_parent == src_parent {
            self.dir_store().rename_slot(src_parent, src_slot, &dst_name)
        } else {
            let renamed = src_entry.with_name(&dst_name)?;
            self.dir_store().insert(dst_parent, &renamed)?;
            self.dir_store().remove(src_parent, &src_name)
        }
    }

    pub fn rm(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve(path)?;
        if name.is_empty() {
            return Err(Error::Fs(FsError::NotFound));
        }
        let (_, entry) = self
            .dir_store()
            .find(parent, &name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        if entry.is_dir() && !self.dir_store().is_empty(entry.first_blk())? {
            return Err(Error::Fs(FsError::DirectoryNotEmpty));
        }
        self.fat.free_chain(entry.first_blk());
        self.dir_store().remove(parent, &name)?;
        self.fat.persist(&self.data_storage)
    }

    pub fn append(&mut self, src: &str, dst: &str) -> Result<()> {
        let (src_parent, src_name) = self.resolve(src)?;
        let (_, src_entry) = self
            .dir_store()
            .find(src_parent, &src_name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        if src_entry.is_dir() {
            return Err(Error::Fs(FsError::IsDirectory));
        }
        if !src_entry.has_rights(READ) {
            return Err(Error::Fs(FsError::PermissionDenied));
        }

        let (dst_parent, dst_name) = self.resolve(dst)?;
        let (dst_slot, mut dst_entry) = self
            .dir_store()
            .find(dst_parent, &dst_name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        if dst_entry.is_dir() {
            return Err(Error::Fs(FsError::IsDirectory));
        }
        if !dst_entry.has_rights(WRITE) {
            return Err(Error::Fs(FsError::PermissionDenied));
        }

        let payload = self.read_chain(src_entry.first_blk(), src_entry.size())?;
        let dst_size = dst_entry.size() as usize;
        let tail_offset = dst_size % BLOCK_SIZE;
        let last_block = self
            .fat
            .chain(dst_entry.first_blk())
            .last()
            .expect("a file's chain always has at least one block");

        let mut cursor = 0;
        if tail_offset != 0 || dst_size == 0 {
            let mut buf = vec![0u8; BLOCK_SIZE];
            self.data_storage.read(last_block as u32, &mut buf)?;
            let space = BLOCK_SIZE - tail_offset;
            let take = payload.len().min(space);
            buf[tail_offset..tail_offset + take].copy_from_slice(&payload[..take]);
            self.data_storage.write(last_block as u32, &buf)?;
            cursor = take;
        }

        let remaining = &payload[cursor..];
        if !remaining.is_empty() {
            let extra_blocks = remaining.len().div_ceil(BLOCK_SIZE);
            let new_blocks = self.fat.allocate_chain(extra_blocks)?;
            self.fat.link_tail(last_block, new_blocks[0]);
            for (i, &block) in new_blocks.iter().enumerate() {
                let start = i * BLOCK_SIZE;
                let end = (start + BLOCK_SIZE).min(remaining.len());
                let mut buf = vec![0u8; BLOCK_SIZE];
                buf[..end - start].copy_from_slice(&remaining[start..end]);
                self.data_storage.write(block as u32, &buf)?;
            }
        }

        dst_entry.set_size(dst_size as u32 + src_entry.size());
        self.dir_store().write_slot(dst_parent, dst_slot, &dst_entry)?;
        self.fat.persist(&self.data_storage)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve(path)?;
        Self::validate_name(&name)?;
        if self.dir_store().find(parent, &name)?.is_some() {
            return Err(Error::Fs(FsError::Duplicate));
        }
        let block = self.fat.allocate_one()?;
        self.dir_store().init_directory_block(block, parent)?;
        let entry = DirEntryRecord::new_dir(&name, block)?;
        if let Err(err) = self.dir_store().insert(parent, &entry) {
            self.fat.free_chain(block);
            self.fat.persist(&self.data_storage)?;
            return Err(err);
        }
        self.fat.persist(&self.data_storage)
    }

    pub fn cd(&mut self, path: &str) -> Result<()> {
        self.cwd = self.resolve_existing_dir(path)?;
        Ok(())
    }

    pub fn pwd<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut components = Vec::new();
        let mut current = self.cwd;
        while current != ROOT_BLOCK {
            let parent = self.parent_of(current)?;
            let name = self
                .dir_store()
                .enumerate(parent)?
                .into_iter()
                .filter(|e| e.name_str() != "." && e.name_str() != "..")
                .find(|e| e.first_blk() == current)
                .ok_or(Error::Fs(FsError::Inconsistent))?
                .name_str()
                .to_string();
            components.push(name);
            current = parent;
        }
        components.reverse();
        write!(out, "/").map_err(|e| Error::Io(IoError::Device(e)))?;
        for component in &components {
            write!(out, "{component}/").map_err(|e| Error::Io(IoError::Device(e)))?;
        }
        Ok(())
    }

    pub fn chmod(&mut self, mode: &str, path: &str) -> Result<()> {
        let rights = parse_mode(mode)?;
        let (parent, name) = self.resolve(path)?;
        if name.is_empty() {
            return Err(Error::Fs(FsError::NotFound));
        }
        let (slot, mut entry) = self
            .dir_store()
            .find(parent, &name)?
            .ok_or(Error::Fs(FsError::NotFound))?;
        entry.set_access_rights(rights);
        self.dir_store().write_slot(parent, slot, &entry)
    }
}

fn parse_mode(mode: &str) -> Result<u8> {
    u8::from_str_radix(mode, 8)
        .ok()
        .filter(|&value| value <= 7)
        .ok_or(Error::Fs(FsError::InvalidMode))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use blockfs_ds::testing::MemoryBlockDevice;
    use blockfs_ds::BLOCK_COUNT;

    use super::*;

    fn mounted() -> Filesystem<MemoryBlockDevice> {
        Filesystem::mount(MemoryBlockDevice::new(BLOCK_COUNT)).unwrap()
    }

    fn create_str(fs: &mut Filesystem<MemoryBlockDevice>, path: &str, payload: &str) {
        let mut input = Cursor::new(format!("{payload}\n"));
        fs.create(path, &mut input).unwrap();
    }

    fn cat_str(fs: &Filesystem<MemoryBlockDevice>, path: &str) -> String {
        let mut out = Vec::new();
        fs.cat(path, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn scenario_create_cat_ls() {
        let mut fs = mounted();
        let mut input = Cursor::new("hi\n\n");
        fs.create("hello", &mut input).unwrap();

        assert_eq!(cat_str(&fs, "hello"), "hi\n");

        let mut out = Vec::new();
        fs.ls(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "name\t type\t accessrights\t size\nhello\t file\t rw-\t 3\n");
    }

    #[test]
    fn scenario_mkdir_cd_pwd() {
        let mut fs = mounted();
        fs.mkdir("a").unwrap();
        fs.mkdir("a/b").unwrap();
        fs.cd("a/b").unwrap();

        let mut out = Vec::new();
        fs.pwd(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "/a/b/");
    }

    #[test]
    fn scenario_chain_spans_two_blocks() {
        let mut fs = mounted();
        let payload = "x".repeat(5000);
        let mut input = Cursor::new(format!("{payload}\n"));
        fs.create("f", &mut input).unwrap();
        assert_eq!(cat_str(&fs, "f").len(), 5001);
    }

    #[test]
    fn scenario_append_additivity() {
        let mut fs = mounted();
        create_str(&mut fs, "f1", "abc");
        create_str(&mut fs, "f2", "xyz");
        fs.append("f1", "f2").unwrap();
        assert_eq!(cat_str(&fs, "f2"), "xyz\nabc\n");
    }

    #[test]
    fn scenario_rm_directory_not_empty_then_empty() {
        let mut fs = mounted();
        fs.mkdir("d").unwrap();
        create_str(&mut fs, "d/x", "hi");
        assert!(matches!(
            fs.rm("d"),
            Err(Error::Fs(FsError::DirectoryNotEmpty))
        ));
        fs.rm("d/x").unwrap();
        fs.rm("d").unwrap();
    }

    #[test]
    fn scenario_chmod_blocks_append() {
        let mut fs = mounted();
        create_str(&mut fs, "a", "x");
        fs.chmod("4", "a").unwrap();
        assert!(matches!(
            fs.append("a", "a"),
            Err(Error::Fs(FsError::PermissionDenied))
        ));
    }

    #[test]
    fn format_erases_everything() {
        let mut fs = mounted();
        create_str(&mut fs, "a", "x");
        fs.format().unwrap();
        let mut out = Vec::new();
        fs.ls(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "name\t type\t accessrights\t size\n");
    }

    #[test]
    fn mv_rename_in_place_is_idempotent() {
        let mut fs = mounted();
        create_str(&mut fs, "a", "x");
        fs.mv("a", "b").unwrap();
        fs.mv("b", "a").unwrap();
        assert_eq!(cat_str(&fs, "a"), "x\n");
    }

    #[test]
    fn cp_preserves_size_and_rights() {
        let mut fs = mounted();
        create_str(&mut fs, "a", "hello");
        fs.chmod("4", "a").unwrap();
        fs.cp("a", "b").unwrap();
        assert_eq!(cat_str(&fs, "b"), "hello\n");
    }

    #[test]
    fn path_resolution_is_independent_of_cwd() {
        let mut fs = mounted();
        fs.mkdir("a").unwrap();
        create_str(&mut fs, "a/x", "hi");
        let from_root = fs.resolve("/a/x").unwrap();
        fs.cd("a").unwrap();
        let from_a = fs.resolve("/a/x").unwrap();
        assert_eq!(from_root, from_a);
    }
}
