//! Block addressing (direct + single indirect) and the read/write/truncate
//! algorithms built on top of it.

use super::image::{Engine, BLOCK_SIZE, DIRECT_PTRS, INDIRECT_CAPACITY, SENTINEL};
use super::inode::RawInode;
use super::raw;

/// Byte offset of data block `block` within the image.
pub(super) fn block_byte_offset(engine: &Engine, block: u32) -> u64 {
    engine.data_block_offset + block as u64 * BLOCK_SIZE
}

impl Engine {
    pub(super) fn read_indirect_entry(&self, indirect_block: u32, slot: usize) -> i32 {
        let offset = block_byte_offset(self, indirect_block) + slot as u64 * 4;
        unsafe { raw::read(self.base(), offset) }
    }

    fn write_indirect_entry(&mut self, indirect_block: u32, slot: usize, value: i32) {
        let offset = block_byte_offset(self, indirect_block) + slot as u64 * 4;
        unsafe { raw::write(self.base_mut(), offset, &value) };
    }

    /// Returns the block index backing logical block `n` of `inode`, if
    /// one is already assigned.
    fn block_for(&self, inode: &RawInode, n: usize) -> Option<u32> {
        let raw = if n < DIRECT_PTRS {
            inode.dptrs[n]
        } else if inode.indirect_dptr == SENTINEL {
            SENTINEL
        } else {
            self.read_indirect_entry(inode.indirect_dptr as u32, n - DIRECT_PTRS)
        };
        (raw != SENTINEL).then_some(raw as u32)
    }

    /// Returns the block index backing logical block `n` of `inode`,
    /// allocating it (and, if needed, the indirect block) on demand.
    fn block_for_write(&mut self, idx: u32, n: usize) -> u32 {
        let mut inode = self.read_inode(idx);
        if n < DIRECT_PTRS {
            if inode.dptrs[n] == SENTINEL {
                let block = self.alloc_block();
                inode.dptrs[n] = block as i32;
                inode.dnum += 1;
                self.write_inode(idx, &inode);
            }
            return self.read_inode(idx).dptrs[n] as u32;
        }

        if inode.indirect_dptr == SENTINEL {
            let indirect = self.alloc_block();
            for slot in 0..INDIRECT_CAPACITY {
                self.write_indirect_entry(indirect, slot, SENTINEL);
            }
            inode.indirect_dptr = indirect as i32;
            self.write_inode(idx, &inode);
        }

        let indirect = self.read_inode(idx).indirect_dptr as u32;
        let slot = n - DIRECT_PTRS;
        let existing = self.read_indirect_entry(indirect, slot);
        if existing != SENTINEL {
            return existing as u32;
        }
        let block = self.alloc_block();
        self.write_indirect_entry(indirect, slot, block as i32);
        let mut inode = self.read_inode(idx);
        inode.dnum += 1;
        self.write_inode(idx, &inode);
        block
    }

    /// Reads up to `size` bytes starting at `offset` into `buf`, clamped
    /// to `inode.size` (the original clamps only to the allocated block
    /// count; this engine also clamps per-byte to the file's recorded
    /// size, per the resolved Open Question in SPEC_FULL.md §4.7).
    pub(super) fn read_data(&self, idx: u32, buf: &mut [u8], offset: u64) -> usize {
        let inode = self.read_inode(idx);
        let file_size = inode.size as u64;
        if offset >= file_size {
            return 0;
        }
        let size = (buf.len() as u64).min(file_size - offset) as usize;

        let mut done = 0usize;
        let mut block_no = (offset / BLOCK_SIZE) as usize;
        let mut intra = (offset % BLOCK_SIZE) as usize;
        while done < size && block_no < inode.dnum as usize {
            let Some(block) = self.block_for(&inode, block_no) else {
                break;
            };
            let chunk = (BLOCK_SIZE as usize - intra).min(size - done);
            let block_off = block_byte_offset(self, block) as usize + intra;
            buf[done..done + chunk].copy_from_slice(&self.mmap[block_off..block_off + chunk]);
            done += chunk;
            block_no += 1;
            intra = 0;
        }
        done
    }

    /// Writes `buf` at `offset`, allocating blocks (and the indirect
    /// block, when crossing logical block 3) on demand.
    pub(super) fn write_data(&mut self, idx: u32, buf: &[u8], offset: u64) -> usize {
        let mut done = 0usize;
        let mut block_no = (offset / BLOCK_SIZE) as usize;
        let mut intra = (offset % BLOCK_SIZE) as usize;
        while done < buf.len() {
            let block = self.block_for_write(idx, block_no);
            let chunk = (BLOCK_SIZE as usize - intra).min(buf.len() - done);
            let block_off = block_byte_offset(self, block) as usize + intra;
            self.mmap[block_off..block_off + chunk].copy_from_slice(&buf[done..done + chunk]);
            done += chunk;
            block_no += 1;
            intra = 0;
        }

        let mut inode = self.read_inode(idx);
        let new_size = (offset + done as u64).max(inode.size as u64);
        inode.size = new_size as u32;
        inode.mtime = super::inode::now();
        self.write_inode(idx, &inode);
        done
    }

    /// Resizes `inode` to `new_size`.
    ///
    /// Shrinking frees every block entirely past the new boundary but
    /// retains the block straddling it, zeroing its tail (the spec's
    /// REDESIGN FLAGS item 2, resolved in favor of not losing retained
    /// bytes). Growing writes zeros from the old size to the new one,
    /// causing the same on-demand allocation as `write_data`.
    pub(super) fn truncate_inode(&mut self, idx: u32, new_size: u64) {
        let inode = self.read_inode(idx);
        let old_size = inode.size as u64;
        if new_size == old_size {
            return;
        }
        if new_size > old_size {
            let pad = vec![0u8; (new_size - old_size) as usize];
            self.write_data(idx, &pad, old_size);
            return;
        }

        let boundary_block = (new_size / BLOCK_SIZE) as usize;
        let intra = (new_size % BLOCK_SIZE) as usize;
        if intra > 0 {
            if let Some(block) = self.block_for(&inode, boundary_block) {
                let off = block_byte_offset(self, block) as usize;
                self.mmap[off + intra..off + BLOCK_SIZE as usize].fill(0);
            }
            self.free_from(idx, boundary_block + 1);
        } else {
            self.free_from(idx, boundary_block);
        }

        let mut inode = self.read_inode(idx);
        inode.size = new_size as u32;
        self.write_inode(idx, &inode);
    }

    /// Frees every block assigned to logical positions `from..` and
    /// compacts `dnum` down to `from` (or fewer, if the indirect block
    /// itself is also freed).
    fn free_from(&mut self, idx: u32, from: usize) {
        let mut inode = self.read_inode(idx);
        let mut freed = 0u32;

        for slot in from.max(1)..DIRECT_PTRS {
            if inode.dptrs[slot] != SENTINEL {
                self.free_block(inode.dptrs[slot] as u32);
                inode.dptrs[slot] = SENTINEL;
                freed += 1;
            }
        }

        if inode.indirect_dptr != SENTINEL {
            let indirect = inode.indirect_dptr as u32;
            let indirect_from = from.saturating_sub(DIRECT_PTRS);
            for slot in indirect_from..INDIRECT_CAPACITY {
                match self.read_indirect_entry(indirect, slot) {
                    SENTINEL => break,
                    block => {
                        self.free_block(block as u32);
                        self.write_indirect_entry(indirect, slot, SENTINEL);
                        freed += 1;
                    }
                }
            }
            if indirect_from == 0 {
                self.free_block(indirect);
                inode.indirect_dptr = SENTINEL;
                freed += 1;
            }
        }

        inode.dnum -= freed as i32;
        self.write_inode(idx, &inode);
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use tempfile::tempdir;

    #[test]
    fn round_trip_write_read() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mknod("/a", libc::S_IFREG | 0o644).unwrap();
        engine.write("/a", b"hello", 0).unwrap();
        let mut buf = [0u8; 5];
        let n = engine.read("/a", &mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_across_indirect_boundary_allocates_indirect_block() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mknod("/big", libc::S_IFREG | 0o644).unwrap();
        let data = vec![b'A'; 4096 * 4];
        engine.write("/big", &data, 0).unwrap();

        let ino = engine.resolve("/big").unwrap();
        let raw = engine.read_inode(ino);
        assert_ne!(raw.indirect_dptr, -1);
        assert_eq!(raw.dnum, 4);

        let mut buf = vec![0u8; data.len()];
        let n = engine.read("/big", &mut buf, 0).unwrap();
        assert_eq!(n, data.len());
        assert!(buf.iter().all(|&b| b == b'A'));
    }

    #[test]
    fn truncate_to_zero_keeps_first_block() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mknod("/a", libc::S_IFREG | 0o644).unwrap();
        engine.write("/a", b"hello world", 0).unwrap();
        engine.truncate("/a", 0).unwrap();

        let ino = engine.resolve("/a").unwrap();
        let raw = engine.read_inode(ino);
        assert_eq!(raw.size, 0);
        assert_ne!(raw.dptrs[0], -1, "the first block is always retained");
    }

    #[test]
    fn shrink_zeroes_straddling_block_tail() {
        let dir = tempdir().unwrap();
        let mut engine = Engine::mount(&dir.path().join("img")).unwrap();
        engine.mknod("/a", libc::S_IFREG | 0o644).unwrap();
        engine.write("/a", &[1u8; 100], 0).unwrap();
        engine.truncate("/a", 10).unwrap();

        let mut buf = [0u8; 100];
        // read_data clamps to inode.size, so read the block directly via
        // a growth back up to see the retained/zeroed bytes underneath.
        engine.truncate("/a", 100).unwrap();
        let n = engine.read("/a", &mut buf, 0).unwrap();
        assert_eq!(n, 100);
        assert_eq!(&buf[..10], &[1u8; 10]);
        assert!(buf[10..].iter().all(|&b| b == 0));
    }
}
