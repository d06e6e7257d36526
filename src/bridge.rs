//! Translates `fuser`'s numeric-inode FUSE callbacks into calls against the
//! path-based engine.
//!
//! The engine never learns about FUSE inode numbers: this module keeps its
//! own table, assigning a FUSE ino the first time a path is `lookup`ed and
//! reusing it afterwards, the way a userspace FUSE bridge normally bolts a
//! numeric-handle layer onto a naturally path-addressed backend.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use nufs::{Attr, Engine};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Maps FUSE's numeric inodes onto engine paths.
struct PathTable {
    path_of: HashMap<u64, String>,
    ino_of: HashMap<String, u64>,
    next_ino: u64,
}

impl PathTable {
    fn new() -> Self {
        let mut path_of = HashMap::new();
        let mut ino_of = HashMap::new();
        path_of.insert(ROOT_INO, "/".to_string());
        ino_of.insert("/".to_string(), ROOT_INO);
        PathTable {
            path_of,
            ino_of,
            next_ino: ROOT_INO + 1,
        }
    }

    fn path(&self, ino: u64) -> Option<&str> {
        self.path_of.get(&ino).map(String::as_str)
    }

    /// Returns the FUSE ino for `path`, assigning a fresh one if this is
    /// the first time it has been seen.
    fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.ino_of.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.path_of.insert(ino, path.to_string());
        self.ino_of.insert(path.to_string(), ino);
        ino
    }

    /// Rewrites every path under `from` (`from` included) to sit under `to`
    /// instead, keeping existing ino assignments stable across a rename.
    fn rename(&mut self, from: &str, to: &str) {
        let moved: Vec<(u64, String)> = self
            .path_of
            .iter()
            .filter(|(_, p)| *p == from || p.starts_with(&format!("{from}/")))
            .map(|(&ino, p)| (ino, p.clone()))
            .collect();
        for (ino, old_path) in moved {
            let new_path = format!("{to}{}", &old_path[from.len()..]);
            self.ino_of.remove(&old_path);
            self.path_of.insert(ino, new_path.clone());
            self.ino_of.insert(new_path, ino);
        }
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.ino_of.remove(path) {
            self.path_of.remove(&ino);
        }
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn to_system_time(secs: i32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

fn file_type(mode: u32) -> FileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        _ => FileType::RegularFile,
    }
}

fn to_file_attr(attr: Attr) -> FileAttr {
    FileAttr {
        ino: attr.ino as u64,
        size: attr.size,
        blocks: attr.blocks,
        atime: to_system_time(attr.atime),
        mtime: to_system_time(attr.mtime),
        ctime: to_system_time(attr.ctime),
        crtime: to_system_time(attr.ctime),
        kind: file_type(attr.mode),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn time_or_now_to_secs(t: TimeOrNow) -> i32 {
    match t {
        TimeOrNow::SpecificTime(t) => t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i32)
            .unwrap_or(0),
        TimeOrNow::Now => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i32)
            .unwrap_or(0),
    }
}

/// A `fuser::Filesystem` adapter over a single mounted [`Engine`].
pub struct Bridge {
    engine: Mutex<Engine>,
    paths: Mutex<PathTable>,
}

impl Bridge {
    pub fn new(engine: Engine) -> Self {
        Bridge {
            engine: Mutex::new(engine),
            paths: Mutex::new(PathTable::new()),
        }
    }
}

impl Filesystem for Bridge {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name);
        let engine = self.engine.lock().unwrap();
        match engine.getattr(&path) {
            Ok(attr) => {
                let ino = paths.ino_for(&path);
                let mut attr = attr;
                attr.ino = ino as u32;
                reply.entry(&TTL, &to_file_attr(attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let engine = self.engine.lock().unwrap();
        match engine.getattr(path) {
            Ok(mut attr) => {
                attr.ino = ino as u32;
                reply.attr(&TTL, &to_file_attr(attr));
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut engine = self.engine.lock().unwrap();

        if let Some(mode) = mode {
            if let Err(e) = engine.chmod(&path, mode) {
                reply.error(e.to_errno());
                return;
            }
        }
        if let Some(size) = size {
            if let Err(e) = engine.truncate(&path, size) {
                reply.error(e.to_errno());
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            let a = atime.map(time_or_now_to_secs);
            let m = mtime.map(time_or_now_to_secs);
            if let Err(e) = engine.utimens(&path, a, m) {
                reply.error(e.to_errno());
                return;
            }
        }

        match engine.getattr(&path) {
            Ok(mut attr) => {
                attr.ino = ino as u32;
                reply.attr(&TTL, &to_file_attr(attr));
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy();
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name);
        let mut engine = self.engine.lock().unwrap();
        match engine.create(&path, mode, req.uid(), req.gid()) {
            Ok(_) => {
                let attr = engine.getattr(&path).unwrap();
                let ino = paths.ino_for(&path);
                let mut attr = attr;
                attr.ino = ino as u32;
                reply.entry(&TTL, &to_file_attr(attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_string_lossy();
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name);
        let mut engine = self.engine.lock().unwrap();
        match engine.mkdir(&path, mode, req.uid(), req.gid()) {
            Ok(_) => {
                let attr = engine.getattr(&path).unwrap();
                let ino = paths.ino_for(&path);
                let mut attr = attr;
                attr.ino = ino as u32;
                reply.entry(&TTL, &to_file_attr(attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name);
        let mut engine = self.engine.lock().unwrap();
        match engine.unlink(&path) {
            Ok(()) => {
                paths.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_string_lossy();
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name);
        let mut engine = self.engine.lock().unwrap();
        match engine.rmdir(&path) {
            Ok(()) => {
                paths.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let name = link_name.to_string_lossy();
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = child_path(&parent_path, &name);
        let target = target.to_string_lossy();
        let mut engine = self.engine.lock().unwrap();
        match engine.symlink(&path, &target, req.uid(), req.gid()) {
            Ok(_) => {
                let attr = engine.getattr(&path).unwrap();
                let ino = paths.ino_for(&path);
                let mut attr = attr;
                attr.ino = ino as u32;
                reply.entry(&TTL, &to_file_attr(attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let engine = self.engine.lock().unwrap();
        // fuser's readlink has no caller-supplied buffer size; PATH_MAX
        // matches what the host kernel would allow through `readlink(2)`.
        match engine.readlink(path, libc::PATH_MAX as usize) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        new_parent: u64,
        new_name: &OsStr,
        reply: ReplyEntry,
    ) {
        let mut paths = self.paths.lock().unwrap();
        let Some(target_path) = paths.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(new_parent_path) = paths.path(new_parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let new_path = child_path(&new_parent_path, &new_name.to_string_lossy());
        let mut engine = self.engine.lock().unwrap();
        match engine.link(&target_path, &new_path) {
            Ok(mut attr) => {
                attr.ino = ino as u32;
                // Track the new name as this ino's canonical path too, so a
                // later `forget`/`unlink` of `target_path` doesn't strand
                // the surviving alias with no entry in `path_of`.
                paths.path_of.insert(ino, new_path.clone());
                paths.ino_of.insert(new_path, ino);
                reply.entry(&TTL, &to_file_attr(attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let mut paths = self.paths.lock().unwrap();
        let Some(parent_path) = paths.path(parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(new_parent_path) = paths.path(new_parent).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let from = child_path(&parent_path, &name.to_string_lossy());
        let to = child_path(&new_parent_path, &new_name.to_string_lossy());
        let mut engine = self.engine.lock().unwrap();
        match engine.rename(&from, &to) {
            Ok(()) => {
                paths.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let paths = self.paths.lock().unwrap();
        if paths.path(ino).is_none() {
            reply.error(libc::ENOENT);
            return;
        }
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut engine = self.engine.lock().unwrap();
        let mut buf = vec![0u8; size as usize];
        match engine.read(path, &mut buf, offset.max(0) as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut engine = self.engine.lock().unwrap();
        match engine.write(path, data, offset.max(0) as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let paths = self.paths.lock().unwrap();
        if paths.path(ino).is_none() {
            reply.error(libc::ENOENT);
            return;
        }
        reply.opened(0, 0);
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let mut paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino).map(String::from) else {
            reply.error(libc::ENOENT);
            return;
        };
        let engine = self.engine.lock().unwrap();
        let entries = match engine.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        for (i, (name, _)) in entries.into_iter().enumerate().skip(offset as usize) {
            let entry_path = if name == "." {
                path.clone()
            } else if name == ".." {
                dirname(&path)
            } else {
                child_path(&path, &name)
            };
            let fuse_ino = paths.ino_for(&entry_path);
            let mode = engine.getattr(&entry_path).map(|a| a.mode).unwrap_or(0);
            let full = reply.add(fuse_ino, (i + 1) as i64, file_type(mode), &name);
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let paths = self.paths.lock().unwrap();
        let Some(path) = paths.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let engine = self.engine.lock().unwrap();
        match engine.access(path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }
}
