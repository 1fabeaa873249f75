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

use std::io::{self, BufRead, Write};
use std::{env, process};

use blockfs_ds::DataStorage;
use blockfs_ds_std::FileBlockDevice;
use blockfs_fs::{Filesystem, Result};
use log::{error, warn};

const DEFAULT_BACKING_FILE: &str = "blockfs.img";

fn main() {
    env_logger::init();

    let backing_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_BACKING_FILE.to_string());
    let device = FileBlockDevice::open_or_create(&backing_path).unwrap_or_else(|err| {
        error!("failed to open backing file {backing_path}: {err}");
        process::exit(1);
    });
    let mut fs = Filesystem::mount(device).unwrap_or_else(|err| {
        error!("failed to mount filesystem: {err}");
        process::exit(1);
    });

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) => {
                error!("failed reading a command line: {err}");
                break;
            }
        };
        if read == 0 {
            break;
        }

        let tokens: Vec<&str> = line
            .trim_end_matches(['\n', '\r'])
            .split_whitespace()
            .collect();
        let Some((&command, args)) = tokens.split_first() else {
            continue;
        };

        if let Err(err) = dispatch(&mut fs, command, args, &mut input, &mut stdout) {
            let _ = writeln!(stdout, "{err}");
        }
    }
}

/// Tokenizes and runs a single command line against `fs`. `create` reads its
/// payload directly off `input`, continuing the same stream the command
/// itself was read from.
fn dispatch<DS, R, W>(
    fs: &mut Filesystem<DS>,
    command: &str,
    args: &[&str],
    input: &mut R,
    out: &mut W,
) -> Result<()>
where
    DS: DataStorage,
    R: BufRead,
    W: Write,
{
    match (command, args) {
        ("format", []) => fs.format(),
        ("create", [path]) => fs.create(path, input),
        ("cat", [path]) => fs.cat(path, out),
        ("ls", []) => fs.ls(out),
        ("cp", [src, dst]) => fs.cp(src, dst),
        ("mv", [src, dst]) => fs.mv(src, dst),
        ("rm", [path]) => fs.rm(path),
        ("append", [src, dst]) => fs.append(src, dst),
        ("mkdir", [path]) => fs.mkdir(path),
        ("cd", [path]) => fs.cd(path),
        ("pwd", []) => fs.pwd(out),
        ("chmod", [mode, path]) => fs.chmod(mode, path),
        _ => {
            warn!("unrecognized command: {command} {args:?}");
            let _ = writeln!(out, "usage: unrecognized command {command:?}");
            Ok(())
        }
    }
}
