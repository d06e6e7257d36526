//! First-fit inode/data-block allocation over the two bitmaps.

use super::bitmap;
use super::image::{Engine, BLOCK_SIZE};

impl Engine {
    /// Scans the inode bitmap for the first free bit, marks it allocated
    /// and returns its index. Exhaustion is a fatal contract violation:
    /// the dispatcher is expected to have no path that calls this without
    /// inodes available to give out in a well-formed workload, and the
    /// spec treats pool exhaustion as an assertion failure, not a
    /// recoverable error.
    pub(super) fn alloc_inode(&mut self) -> u32 {
        let count = self.inode_count;
        let offset = self.inode_bitmap_offset as usize;
        let bitmap = &mut self.mmap[offset..];
        for i in 0..count as usize {
            if bitmap::is_free(bitmap, i) {
                bitmap::set(bitmap, i);
                return i as u32;
            }
        }
        panic!("inode pool exhausted");
    }

    /// Scans the data bitmap for the first free bit, marks it allocated,
    /// zeroes its contents to erase any previous tenant's data, and returns
    /// its index.
    pub(super) fn alloc_block(&mut self) -> u32 {
        let count = self.data_block_count;
        let offset = self.data_bitmap_offset as usize;
        let bitmap = &mut self.mmap[offset..];
        for i in 0..count as usize {
            if bitmap::is_free(bitmap, i) {
                bitmap::set(bitmap, i);
                let start = self.data_block_offset as usize + i * BLOCK_SIZE as usize;
                self.mmap[start..start + BLOCK_SIZE as usize].fill(0);
                return i as u32;
            }
        }
        panic!("data block pool exhausted");
    }

    /// Marks inode `idx` free.
    pub(super) fn free_inode(&mut self, idx: u32) {
        let offset = self.inode_bitmap_offset as usize;
        bitmap::clear(&mut self.mmap[offset..], idx as usize);
    }

    /// Marks data block `idx` free.
    pub(super) fn free_block(&mut self, idx: u32) {
        let offset = self.data_bitmap_offset as usize;
        bitmap::clear(&mut self.mmap[offset..], idx as usize);
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use tempfile::tempdir;

    #[test]
    fn alloc_block_is_first_fit() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        let a = engine.alloc_block();
        let b = engine.alloc_block();
        assert_ne!(a, b);
        engine.free_block(a);
        let c = engine.alloc_block();
        assert_eq!(a, c, "first-fit must reuse the lowest freed index");
    }
}
