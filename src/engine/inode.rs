//! Inode lifecycle: creation, deletion, lookup and attribute updates.

use std::time::{SystemTime, UNIX_EPOCH};

use super::image::{Engine, DIRECT_PTRS, INODE_SIZE, SENTINEL};
use super::raw;

/// The on-disk inode record. Every field is 4 bytes wide, so the natural
/// `repr(C)` layout already matches the declaration order with no
/// padding.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawInode {
    pub ino: i32,
    pub mode: u32,
    pub size: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i32,
    pub ctime: i32,
    pub mtime: i32,
    pub nlink: i32,
    pub dnum: i32,
    pub dptrs: [i32; DIRECT_PTRS],
    pub indirect_dptr: i32,
}

/// Returns the current time as seconds since the Unix epoch, truncated to
/// the granularity the on-disk inode stores (per spec, sub-second
/// precision is out of scope).
pub(super) fn now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or(0)
}

/// Returns `true` iff `mode`'s type bits mark a directory.
pub fn is_dir(mode: u32) -> bool {
    mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
}

/// Returns `true` iff `mode`'s type bits mark a symbolic link.
pub fn is_symlink(mode: u32) -> bool {
    mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
}

impl Engine {
    fn inode_offset(&self, idx: u32) -> u64 {
        self.inode_table_offset + idx as u64 * INODE_SIZE
    }

    pub(super) fn read_inode(&self, idx: u32) -> RawInode {
        unsafe { raw::read(self.base(), self.inode_offset(idx)) }
    }

    pub(super) fn write_inode(&mut self, idx: u32, inode: &RawInode) {
        let offset = self.inode_offset(idx);
        unsafe { raw::write(self.base_mut(), offset, inode) };
    }

    /// Formats the root directory inode (index 0), whose parent is
    /// itself, during first-time image creation.
    pub(super) fn create_root(&mut self) {
        let idx = self.alloc_inode();
        debug_assert_eq!(idx, 0, "the root must be the first inode allocated");
        let block = self.alloc_block();
        let ts = now();
        let inode = RawInode {
            ino: idx as i32,
            mode: libc::S_IFDIR as u32 | 0o755,
            size: 0,
            uid: 0,
            gid: 0,
            atime: ts,
            ctime: ts,
            mtime: ts,
            nlink: 1,
            dnum: 1,
            dptrs: [block as i32, SENTINEL, SENTINEL],
            indirect_dptr: SENTINEL,
        };
        self.write_inode(idx, &inode);
        self.dir_init(block, idx);
        self.root_ino = idx;
    }

    /// Allocates an inode and its first data block, wires it into
    /// `parent`'s directory table under `name`, and returns its index.
    ///
    /// If `mode` marks a directory, the first block is initialized as an
    /// empty directory table whose `..` points back at `parent`.
    pub(super) fn create_inode(
        &mut self,
        parent: u32,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> super::error::Result<u32> {
        if name.len() > super::directory::NAME_MAX {
            return Err(super::error::Error::InvalidName);
        }
        let parent_inode = self.read_inode(parent);
        let parent_block = parent_inode.dptrs[0] as u32;
        if self.dir_lookup(parent_block, name).is_some() {
            return Err(super::error::Error::Exists);
        }

        let idx = self.alloc_inode();
        let block = self.alloc_block();
        let ts = now();
        let inode = RawInode {
            ino: idx as i32,
            mode,
            size: 0,
            uid,
            gid,
            atime: ts,
            ctime: ts,
            mtime: ts,
            nlink: 1,
            dnum: 1,
            dptrs: [block as i32, SENTINEL, SENTINEL],
            indirect_dptr: SENTINEL,
        };
        self.write_inode(idx, &inode);

        if is_dir(mode) {
            self.dir_init(block, parent);
        }

        if !self.dir_add(parent_block, idx, name) {
            // Roll back: the directory table was full.
            self.free_block(block);
            self.free_inode(idx);
            return Err(super::error::Error::NoSpace);
        }
        Ok(idx)
    }

    /// Frees every data block owned by `inode` (direct, indirect entries,
    /// then the indirect block itself), then clears its bitmap bit.
    pub(super) fn delete_inode(&mut self, idx: u32) {
        let inode = self.read_inode(idx);
        for &ptr in inode.dptrs.iter() {
            if ptr == SENTINEL {
                break;
            }
            self.free_block(ptr as u32);
        }
        if inode.indirect_dptr != SENTINEL {
            let indirect = inode.indirect_dptr as u32;
            for slot in 0..super::image::INDIRECT_CAPACITY {
                match self.read_indirect_entry(indirect, slot) {
                    SENTINEL => break,
                    block => self.free_block(block as u32),
                }
            }
            self.free_block(indirect);
        }
        self.free_inode(idx);
    }

    /// Updates the mode's permission bits (the type bits are immutable
    /// after creation) and refreshes ctime.
    pub(super) fn set_mode(&mut self, idx: u32, mode_bits: u32) {
        let mut inode = self.read_inode(idx);
        let file_type = inode.mode & libc::S_IFMT as u32;
        inode.mode = file_type | (mode_bits & !libc::S_IFMT as u32);
        inode.ctime = now();
        self.write_inode(idx, &inode);
    }

    /// Sets atime/mtime; `None` leaves the corresponding field untouched
    /// (mirrors `utimensat`'s `UTIME_OMIT`).
    pub(super) fn set_times(&mut self, idx: u32, atime: Option<i32>, mtime: Option<i32>) {
        let mut inode = self.read_inode(idx);
        if let Some(a) = atime {
            inode.atime = a;
        }
        if let Some(m) = mtime {
            inode.mtime = m;
        }
        self.write_inode(idx, &inode);
    }

    pub(super) fn touch_atime(&mut self, idx: u32) {
        let mut inode = self.read_inode(idx);
        inode.atime = now();
        self.write_inode(idx, &inode);
    }
}
