//! The engine's path-based operation surface, mirroring the original
//! FUSE 2.6 callback set. `bridge.rs` translates host-kernel inode numbers
//! into paths (or cached lookups) and calls straight through to these
//! methods.

use log::debug;

use super::directory::NAME_MAX;
use super::error::{Error, Result};
use super::image::Engine;
use super::inode::{is_dir, is_symlink, now};
use super::path::{basename, parent_path};

/// A snapshot of an inode's metadata, independent of any host-kernel
/// attribute struct so the engine has no `fuser` dependency of its own.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub ino: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
}

impl Engine {
    /// Resolves `path` and checks it exists; used for FUSE's `access`.
    pub fn access(&self, path: &str) -> Result<()> {
        self.resolve(path).map(|_| ())
    }

    /// Returns `path`'s metadata.
    pub fn getattr(&self, path: &str) -> Result<Attr> {
        let ino = self.resolve(path)?;
        Ok(self.attr_of(ino))
    }

    fn attr_of(&self, ino: u32) -> Attr {
        let inode = self.read_inode(ino);
        Attr {
            ino,
            mode: inode.mode,
            nlink: inode.nlink as u32,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size as u64,
            // 512-byte sectors per block, matching `st_blocks`'s unit.
            blocks: inode.dnum as u64 * (super::image::BLOCK_SIZE / 512),
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        }
    }

    /// Creates a regular file (or other non-directory node) at `path`.
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<u32> {
        self.create_at(path, mode, 0, 0)
    }

    /// Creates a regular file at `path` owned by `uid`/`gid`.
    pub fn create(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u32> {
        self.create_at(path, mode, uid, gid)
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u32> {
        self.create_at(path, libc::S_IFDIR as u32 | mode, uid, gid)
    }

    fn create_at(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u32> {
        debug!("create_at {path} mode={mode:#o}");
        let parent = self.resolve(parent_path(path))?;
        let parent_inode = self.read_inode(parent);
        if !is_dir(parent_inode.mode) {
            return Err(Error::NotADirectory);
        }
        let result = self.create_inode(parent, basename(path), mode, uid, gid);
        debug!("create_at {path} -> {result:?}");
        result
    }

    /// Removes an empty directory at `path`.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        debug!("rmdir {path}");
        let ino = self.resolve(path)?;
        if ino == self.root_ino {
            return Err(Error::NotEmpty);
        }
        let inode = self.read_inode(ino);
        if !is_dir(inode.mode) {
            return Err(Error::NotADirectory);
        }
        if !self.dir_is_empty(inode.dptrs[0] as u32) {
            return Err(Error::NotEmpty);
        }
        let parent = self.resolve(parent_path(path))?;
        let parent_block = self.read_inode(parent).dptrs[0] as u32;
        self.dir_remove(parent_block, ino);
        self.delete_inode(ino);
        Ok(())
    }

    /// Removes the directory entry at `path`; deletes the inode once its
    /// link count reaches zero.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        debug!("unlink {path}");
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino);
        if is_dir(inode.mode) {
            return Err(Error::IsADirectory);
        }
        let parent = self.resolve(parent_path(path))?;
        let parent_block = self.read_inode(parent).dptrs[0] as u32;
        self.dir_remove(parent_block, ino);

        let mut inode = self.read_inode(ino);
        inode.nlink -= 1;
        if inode.nlink <= 0 {
            self.delete_inode(ino);
        } else {
            inode.ctime = now();
            self.write_inode(ino, &inode);
        }
        Ok(())
    }

    /// Adds a new name for `target` at `new_path`, bumping its link count.
    pub fn link(&mut self, target: &str, new_path: &str) -> Result<Attr> {
        let ino = self.resolve(target)?;
        if is_dir(self.read_inode(ino).mode) {
            return Err(Error::IsADirectory);
        }
        let name = basename(new_path);
        if name.len() > NAME_MAX {
            return Err(Error::InvalidName);
        }
        let parent = self.resolve(parent_path(new_path))?;
        let parent_block = self.read_inode(parent).dptrs[0] as u32;
        if self.dir_lookup(parent_block, name).is_some() {
            return Err(Error::Exists);
        }
        if !self.dir_add(parent_block, ino, name) {
            return Err(Error::NoSpace);
        }

        let mut inode = self.read_inode(ino);
        inode.nlink += 1;
        inode.ctime = now();
        self.write_inode(ino, &inode);
        Ok(self.attr_of(ino))
    }

    /// Creates a symbolic link at `path` whose stored data is `target`.
    pub fn symlink(&mut self, path: &str, target: &str, uid: u32, gid: u32) -> Result<u32> {
        let ino = self.create_at(path, libc::S_IFLNK as u32 | 0o777, uid, gid)?;
        self.write_data(ino, target.as_bytes(), 0);
        Ok(ino)
    }

    /// Returns up to `size` bytes of the stored target of the symbolic link
    /// at `path`, mirroring `readlink(2)`'s silent truncation to a
    /// caller-supplied buffer.
    pub fn readlink(&self, path: &str, size: usize) -> Result<String> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino);
        if !is_symlink(inode.mode) {
            return Err(Error::NotFound);
        }
        let len = (inode.size as usize).min(size);
        let mut buf = vec![0u8; len];
        self.read_data(ino, &mut buf, 0);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Moves the entry at `from` to `to`, overwriting an existing
    /// non-directory entry at `to` if present.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let ino = self.resolve(from)?;
        let from_parent = self.resolve(parent_path(from))?;
        let from_block = self.read_inode(from_parent).dptrs[0] as u32;

        let to_name = basename(to);
        if to_name.len() > NAME_MAX {
            return Err(Error::InvalidName);
        }
        let to_parent = self.resolve(parent_path(to))?;
        let to_block = self.read_inode(to_parent).dptrs[0] as u32;

        if let Some(existing) = self.dir_lookup(to_block, to_name) {
            if is_dir(self.read_inode(existing).mode) {
                return Err(Error::IsADirectory);
            }
            self.dir_remove(to_block, existing);
            let mut existing_inode = self.read_inode(existing);
            existing_inode.nlink -= 1;
            if existing_inode.nlink <= 0 {
                self.delete_inode(existing);
            } else {
                self.write_inode(existing, &existing_inode);
            }
        }

        self.dir_remove(from_block, ino);
        if !self.dir_add(to_block, ino, to_name) {
            // Put it back; the destination directory had no room.
            self.dir_add(from_block, ino, basename(from));
            return Err(Error::NoSpace);
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes from `path` at `offset`.
    pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino);
        if is_dir(inode.mode) {
            return Err(Error::IsADirectory);
        }
        self.touch_atime(ino);
        Ok(self.read_data(ino, buf, offset))
    }

    /// Writes `buf` to `path` at `offset`.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
        debug!("write {path} len={} offset={offset}", buf.len());
        let ino = self.resolve(path)?;
        if is_dir(self.read_inode(ino).mode) {
            return Err(Error::IsADirectory);
        }
        Ok(self.write_data(ino, buf, offset))
    }

    /// Resizes `path` to `new_size`.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<()> {
        debug!("truncate {path} to {new_size}");
        let ino = self.resolve(path)?;
        if is_dir(self.read_inode(ino).mode) {
            return Err(Error::IsADirectory);
        }
        if new_size > super::image::MAX_FILE_SIZE {
            return Err(Error::NoSpace);
        }
        self.truncate_inode(ino, new_size);
        Ok(())
    }

    /// Changes `path`'s permission bits.
    pub fn chmod(&mut self, path: &str, mode_bits: u32) -> Result<()> {
        let ino = self.resolve(path)?;
        self.set_mode(ino, mode_bits);
        Ok(())
    }

    /// Updates `path`'s access and/or modification time.
    pub fn utimens(&mut self, path: &str, atime: Option<i32>, mtime: Option<i32>) -> Result<()> {
        let ino = self.resolve(path)?;
        self.set_times(ino, atime, mtime);
        Ok(())
    }

    /// Lists `path`'s entries as `(name, ino)` pairs, synthesizing `.` (the
    /// directory table never stores it) ahead of the stored `..` and
    /// children.
    pub fn readdir(&self, path: &str) -> Result<Vec<(String, u32)>> {
        let ino = self.resolve(path)?;
        let inode = self.read_inode(ino);
        if !is_dir(inode.mode) {
            return Err(Error::NotADirectory);
        }
        let mut entries = vec![(".".to_string(), ino)];
        self.dir_for_each(inode.dptrs[0] as u32, |name, child| {
            entries.push((name.to_string(), child));
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mkdir_and_readdir_list_dot_and_dotdot() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mkdir("/sub", 0o755, 0, 0).unwrap();
        let entries = engine.readdir("/sub").unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn rmdir_rejects_nonempty_directory() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mkdir("/sub", 0o755, 0, 0).unwrap();
        engine.mknod("/sub/f", libc::S_IFREG | 0o644).unwrap();
        assert_eq!(engine.rmdir("/sub").unwrap_err(), Error::NotEmpty);
        engine.unlink("/sub/f").unwrap();
        engine.rmdir("/sub").unwrap();
        assert_eq!(engine.resolve("/sub").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn hard_link_survives_original_unlink() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mknod("/a", libc::S_IFREG | 0o644).unwrap();
        engine.write("/a", b"data", 0).unwrap();
        engine.link("/a", "/b").unwrap();
        assert_eq!(engine.getattr("/a").unwrap().nlink, 2);

        engine.unlink("/a").unwrap();
        assert_eq!(engine.resolve("/a").unwrap_err(), Error::NotFound);
        let mut buf = [0u8; 4];
        engine.read("/b", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn symlink_readlink_roundtrip() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mknod("/a", libc::S_IFREG | 0o644).unwrap();
        engine.symlink("/link", "/a", 0, 0).unwrap();
        assert_eq!(engine.readlink("/link", 128).unwrap(), "/a");
        assert_eq!(engine.readlink("/link", 1).unwrap(), "/");
    }
}
