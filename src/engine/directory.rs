//! Fixed-capacity directory-entry table stored in the first data block of
//! a directory inode.

use super::image::{Engine, BLOCK_SIZE, SENTINEL};
use super::raw;

/// Maximum length of a directory entry name, not counting the NUL
/// terminator.
pub const NAME_MAX: usize = 47;
/// Total on-disk size of a directory entry.
pub const ENTRY_SIZE: u64 = std::mem::size_of::<RawDirEntry>() as u64;
/// Number of entries that fit in one data block.
pub const ENTRIES_PER_BLOCK: usize = (BLOCK_SIZE / ENTRY_SIZE) as usize;

/// A single directory entry: a name and the inode index it refers to.
///
/// `name`'s length (48, a multiple of 4) keeps `ino` naturally aligned
/// with no padding inserted before it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawDirEntry {
    name: [u8; NAME_MAX + 1],
    ino: i32,
    _reserved: [u8; 12],
}

impl RawDirEntry {
    fn free() -> Self {
        RawDirEntry {
            name: [0; NAME_MAX + 1],
            ino: SENTINEL,
            _reserved: [0; 12],
        }
    }

    fn is_free(&self) -> bool {
        self.ino == SENTINEL
    }

    fn name_str(&self) -> &str {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..nul]).unwrap_or("")
    }

    fn set_name(&mut self, name: &str) {
        self.name = [0; NAME_MAX + 1];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }
}

impl Engine {
    fn entry_offset(&self, block: u32, slot: usize) -> u64 {
        super::file_data::block_byte_offset(self, block) + slot as u64 * ENTRY_SIZE
    }

    fn read_entry(&self, block: u32, slot: usize) -> RawDirEntry {
        unsafe { raw::read(self.base(), self.entry_offset(block, slot)) }
    }

    fn write_entry(&mut self, block: u32, slot: usize, entry: &RawDirEntry) {
        let offset = self.entry_offset(block, slot);
        unsafe { raw::write(self.base_mut(), offset, entry) };
    }

    /// Initializes `dir_block` (the first data block of a freshly-created
    /// directory inode) with a `..` entry at slot 0 pointing at `parent`,
    /// and every other slot free. There is deliberately no `.` entry
    /// stored; `readdir` synthesizes it.
    pub(super) fn dir_init(&mut self, dir_block: u32, parent: u32) {
        let mut dotdot = RawDirEntry::free();
        dotdot.set_name("..");
        dotdot.ino = parent as i32;
        self.write_entry(dir_block, 0, &dotdot);
        for slot in 1..ENTRIES_PER_BLOCK {
            self.write_entry(dir_block, slot, &RawDirEntry::free());
        }
    }

    /// Linear scan for `name`; returns its inode index, or `None`.
    pub(super) fn dir_lookup(&self, dir_block: u32, name: &str) -> Option<u32> {
        (0..ENTRIES_PER_BLOCK).find_map(|slot| {
            let entry = self.read_entry(dir_block, slot);
            (!entry.is_free() && entry.name_str() == name).then_some(entry.ino as u32)
        })
    }

    /// Places `(name, ino)` in the first free slot. Returns `false` (and
    /// touches nothing) if the table is full.
    pub(super) fn dir_add(&mut self, dir_block: u32, ino: u32, name: &str) -> bool {
        for slot in 0..ENTRIES_PER_BLOCK {
            if self.read_entry(dir_block, slot).is_free() {
                let mut entry = RawDirEntry::free();
                entry.set_name(name);
                entry.ino = ino as i32;
                self.write_entry(dir_block, slot, &entry);
                return true;
            }
        }
        false
    }

    /// Linear scan for the first entry referring to `ino`; frees it.
    pub(super) fn dir_remove(&mut self, dir_block: u32, ino: u32) {
        for slot in 0..ENTRIES_PER_BLOCK {
            if self.read_entry(dir_block, slot).ino == ino as i32 {
                self.write_entry(dir_block, slot, &RawDirEntry::free());
                return;
            }
        }
    }

    /// A directory is empty when every entry except `..` is free.
    pub(super) fn dir_is_empty(&self, dir_block: u32) -> bool {
        (1..ENTRIES_PER_BLOCK).all(|slot| self.read_entry(dir_block, slot).is_free())
    }

    /// Invokes `f(name, ino)` for every live entry in the block, in slot
    /// order (so `..` at slot 0 comes first).
    pub(super) fn dir_for_each(&self, dir_block: u32, mut f: impl FnMut(&str, u32)) {
        for slot in 0..ENTRIES_PER_BLOCK {
            let entry = self.read_entry(dir_block, slot);
            if !entry.is_free() {
                f(entry.name_str(), entry.ino as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::error::Error;
    use crate::engine::Engine;
    use tempfile::tempdir;

    #[test]
    fn sixty_fifth_entry_is_rejected() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        for i in 0..63 {
            let path = format!("/f{i}");
            engine.mknod(&path, libc::S_IFREG | 0o644).unwrap();
        }
        // slot 0 is `..`, so 63 creations fill the remaining slots exactly.
        let err = engine.mknod("/overflow", libc::S_IFREG | 0o644).unwrap_err();
        assert_eq!(err, Error::NoSpace);
    }
}
