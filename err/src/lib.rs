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

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(#[from] IoError),
    #[error("{0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("block {0} is out of range")]
    OutOfRange(u32),
    #[error("device I/O failure: {0}")]
    Device(#[from] std::io::Error),
}

/// Filesystem-level error kinds, one per row of the core's error table.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("path not found")]
    PathNotFound,
    #[error("not found")]
    NotFound,
    #[error("file exists")]
    Duplicate,
    #[error("name too long")]
    NameTooLong,
    #[error("directory full")]
    DirectoryFull,
    #[error("no space left on device")]
    NoSpace,
    #[error("permission denied")]
    PermissionDenied,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("invalid mode")]
    InvalidMode,
    #[error("on-disk structure is inconsistent")]
    Inconsistent,
}

pub type Result<T> = core::result::Result<T, Error>;
