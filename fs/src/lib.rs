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

//! A FAT-style block filesystem: a block allocator, a single-block
//! directory store, and path resolution and operations on top of them,
//! layered over any [`blockfs_ds::DataStorage`] backend.

pub use blockfs_err::{Error, FsError, IoError, Result};

mod dir;
mod fat;
mod ops;
mod path;

pub use dir::DirEntryRecord;
pub use ops::Filesystem;

/// Block holding the root directory.
pub const ROOT_BLOCK: u16 = 0;
/// Block holding the serialized FAT.
pub const FAT_BLOCK: u16 = 1;

/// FAT slot value meaning "free".
pub const FAT_FREE: i16 = 0;
/// FAT slot value meaning "end of chain".
pub const FAT_EOF: i16 = -1;

pub const TYPE_FILE: u8 = 0;
pub const TYPE_DIR: u8 = 1;

pub const READ: u8 = 4;
pub const WRITE: u8 = 2;
pub const EXECUTE: u8 = 1;

/// Maximum entry name length in bytes; the on-disk field is 56 bytes,
/// null-terminated.
pub const MAX_NAME_LEN: usize = 55;
