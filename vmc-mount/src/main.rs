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

//! FUSE host binding for the PlayStation 2 memory card filesystem engine.
//!
//! The engine (`vmc_fs_vmc::Vmc`) only knows paths; FUSE only knows inode
//! numbers. This binary owns the translation between the two in [`Inodes`]
//! and otherwise forwards every callback straight through to a single
//! `Vmc`, serialized behind a [`Mutex`] (§5).

mod inode;

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use clap::Parser;
use fuser::{
    FileAttr as FuseFileAttr, FileType, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use vmc_err::Error;
use vmc_fs::{FileAttr, FileKind, Filesystem as VmcFilesystem, RenameFlags};
use vmc_fs_vmc::Vmc;

use inode::Inodes;

const TTL: Duration = Duration::from_secs(1);

/// Mounts a PlayStation 2 memory card image as a FUSE filesystem.
#[derive(Parser)]
#[command(name = "vmc-mount", version, about)]
struct Args {
    /// Path of the memory card image to mount.
    image: String,

    /// Directory to mount the filesystem at.
    mountpoint: String,

    /// Write through to the image file directly instead of mounting an
    /// in-memory snapshot. Slower, but every write survives a crash.
    #[arg(short = 'S', long)]
    sync: bool,

    /// Stay attached to the controlling terminal instead of detaching.
    /// This binary never detaches regardless of this flag; it is accepted
    /// for compatibility with the reference driver's option table.
    #[arg(short, long)]
    foreground: bool,

    /// Accepted for compatibility; fuser's session loop is single-threaded
    /// in this crate version regardless.
    #[arg(long)]
    single_thread: bool,

    /// Accepted for compatibility; has no effect (see `--single-thread`).
    #[arg(long)]
    max_threads: Option<usize>,

    /// Increase log verbosity; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    if !args.foreground {
        log::warn!("--foreground was not given, but this binary never detaches from the terminal");
    }
    if args.single_thread || args.max_threads.is_some() {
        log::warn!("--single-thread/--max-threads are accepted but inert; fuser runs single-threaded here");
    }

    let file = match OpenOptions::new().read(true).write(true).open(&args.image) {
        Ok(file) => file,
        Err(err) => {
            log::error!("failed to open {}: {err}", args.image);
            return ExitCode::FAILURE;
        }
    };

    let vmc_result = if args.sync {
        open_sync(file)
    } else {
        open_snapshot(file)
    };
    let vmc = match vmc_result {
        Ok(vmc) => vmc,
        Err(err) => {
            log::error!("failed to mount {}: {err}", args.image);
            return ExitCode::FAILURE;
        }
    };

    let options = vec![
        MountOption::FSName("vmc".to_string()),
        MountOption::DefaultPermissions,
        if args.sync { MountOption::Sync } else { MountOption::Async },
    ];

    log::info!("mounting {} at {}", args.image, args.mountpoint);
    match vmc {
        OpenedVmc::Snapshot(vmc) => {
            let adapter = VmcFuse::new(vmc);
            if let Err(err) = fuser::mount2(adapter, &args.mountpoint, &options) {
                log::error!("mount session ended with an error: {err}");
                return ExitCode::FAILURE;
            }
        }
        OpenedVmc::Sync(vmc) => {
            let adapter = VmcFuse::new(vmc);
            if let Err(err) = fuser::mount2(adapter, &args.mountpoint, &options) {
                log::error!("mount session ended with an error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

enum OpenedVmc {
    Snapshot(Vmc<vmc_ds_std::MemoryStorage>),
    Sync(Vmc<vmc_ds_std::FileStorage>),
}

fn open_snapshot(file: File) -> vmc_err::Result<OpenedVmc> {
    use std::io::Read;
    use vmc_ds_std::MemoryStorage;

    let mut bytes = Vec::new();
    let mut file = file;
    file.read_to_end(&mut bytes)
        .map_err(|_| Error::Io(vmc_err::IoError::OutOfRange))?;
    log::warn!("mounting in snapshot mode: changes will not be written back to the image file");
    let vmc = Vmc::open(MemoryStorage::new(bytes))?;
    Ok(OpenedVmc::Snapshot(vmc))
}

fn open_sync(file: File) -> vmc_err::Result<OpenedVmc> {
    use vmc_ds_std::FileStorage;

    let storage = FileStorage::open(file)?;
    let vmc = Vmc::open(storage)?;
    Ok(OpenedVmc::Sync(vmc))
}

/// Collapses a POSIX creation mode down to the three owner `rwx` bits this
/// format actually stores (§3 `mode`); the `PROTECTED`/`CREATED`/`HIDDEN`/
/// `FILE`/`DIRECTORY`/`EXISTS` bits are the engine's to set, not the
/// kernel's, so anything outside owner `rwx` here would collide with them.
fn to_vmc_mode(posix_mode: u32) -> u16 {
    let mut bits = 0u16;
    if posix_mode & 0o400 != 0 {
        bits |= vmc_fs_vmc::mode::READ;
    }
    if posix_mode & 0o200 != 0 {
        bits |= vmc_fs_vmc::mode::WRITE;
    }
    if posix_mode & 0o100 != 0 {
        bits |= vmc_fs_vmc::mode::EXECUTE;
    }
    bits
}

fn to_fuse_attr(ino: u64, attr: &FileAttr) -> FuseFileAttr {
    let perm = attr.mode & 0o777;
    FuseFileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: match attr.kind {
            FileKind::File => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
        },
        perm,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// Adapts a single `Vmc<S>` to `fuser::Filesystem`, serialized behind a
/// `Mutex` and addressed by the inode numbers [`Inodes`] hands out (§5,
/// §10).
struct VmcFuse<S: vmc_ds::Storage> {
    vmc: Mutex<Vmc<S>>,
    inodes: Mutex<Inodes>,
}

impl<S: vmc_ds::Storage> VmcFuse<S> {
    fn new(vmc: Vmc<S>) -> Self {
        Self {
            vmc: Mutex::new(vmc),
            inodes: Mutex::new(Inodes::new()),
        }
    }
}

impl<S: vmc_ds::Storage> fuser::Filesystem for VmcFuse<S> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let vmc = self.vmc.lock().unwrap();
        match vmc.getattr(&path) {
            Ok(attr) => {
                let ino = inodes.intern(&path);
                reply.entry(&TTL, &to_fuse_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = self.inodes.lock().unwrap().path(ino);
        let Some(path) = path else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.vmc.lock().unwrap().getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &to_fuse_attr(ino, &attr)),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.lock().unwrap().path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut vmc = self.vmc.lock().unwrap();
        if let Some(mtime) = mtime {
            let mtime = match mtime {
                TimeOrNow::SpecificTime(t) => t,
                TimeOrNow::Now => SystemTime::now(),
            };
            if let Err(err) = vmc.utimens(&path, mtime) {
                reply.error(-err.to_errno());
                return;
            }
        }
        match vmc.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &to_fuse_attr(ino, &attr)),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.lock().unwrap().path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.vmc.lock().unwrap().open(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.lock().unwrap().path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.vmc.lock().unwrap().open(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.lock().unwrap().path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match self.vmc.lock().unwrap().read(&path, offset as u64, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inodes.lock().unwrap().path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.vmc.lock().unwrap().write(&path, offset as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let mut inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let vmc = self.vmc.lock().unwrap();

        let mut entries = Vec::new();
        let result = vmc.readdir(&path, &mut |entry| {
            entries.push((entry.name.to_string(), entry.kind));
        });
        if let Err(err) = result {
            reply.error(-err.to_errno());
            return;
        }

        for (i, (name, kind)) in entries.into_iter().enumerate().skip(offset as usize) {
            let child_path = inode::join(&path, &name);
            let child_ino = inodes.intern(&child_path);
            let fuse_kind = match kind {
                FileKind::File => FileType::RegularFile,
                FileKind::Directory => FileType::Directory,
            };
            if reply.add(child_ino, (i + 1) as i64, fuse_kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut vmc = self.vmc.lock().unwrap();
        if let Err(err) = vmc.mkdir(&path, to_vmc_mode(mode)) {
            reply.error(-err.to_errno());
            return;
        }
        match vmc.getattr(&path) {
            Ok(attr) => {
                let ino = inodes.intern(&path);
                reply.entry(&TTL, &to_fuse_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut vmc = self.vmc.lock().unwrap();
        if let Err(err) = vmc.create(&path, to_vmc_mode(mode)) {
            reply.error(-err.to_errno());
            return;
        }
        match vmc.getattr(&path) {
            Ok(attr) => {
                let ino = inodes.intern(&path);
                reply.created(&TTL, &to_fuse_attr(ino, &attr), 0, 0, 0);
            }
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(path) = self.inodes.lock().unwrap().child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.vmc.lock().unwrap().unlink(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(path) = self.inodes.lock().unwrap().child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };

        let vmc = self.vmc.lock().unwrap();
        let mut child_count = 0usize;
        let result = vmc.readdir(&path, &mut |_| child_count += 1);
        drop(vmc);
        if let Err(err) = result {
            reply.error(-err.to_errno());
            return;
        }
        if child_count > 2 {
            reply.error(libc::ENOTEMPTY);
            return;
        }

        match self.vmc.lock().unwrap().rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(-err.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut inodes = self.inodes.lock().unwrap();
        let (Some(from), Some(to)) = (inodes.child_path(parent, name), inodes.child_path(newparent, newname)) else {
            reply.error(libc::ENOENT);
            return;
        };

        let rename_flags = RenameFlags {
            noreplace: flags & libc::RENAME_NOREPLACE as u32 != 0,
            exchange: flags & libc::RENAME_EXCHANGE as u32 != 0,
        };
        match self.vmc.lock().unwrap().rename(&from, &to, rename_flags) {
            Ok(()) => {
                inodes.rename(&from, &to);
                reply.ok();
            }
            Err(err) => reply.error(-err.to_errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_fuse_attr_maps_kind_and_mode() {
        let attr = FileAttr {
            kind: FileKind::Directory,
            mode: 0o755,
            size: 42,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        };
        let fuse_attr = to_fuse_attr(7, &attr);
        assert_eq!(fuse_attr.ino, 7);
        assert_eq!(fuse_attr.kind, FileType::Directory);
        assert_eq!(fuse_attr.perm, 0o755);
        assert_eq!(fuse_attr.size, 42);
    }
}
