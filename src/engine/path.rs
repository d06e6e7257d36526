//! Splitting and resolving slash-delimited absolute paths.
//!
//! Symbolic links are never followed here: resolution stops at them like
//! it would at a regular file, leaving target-following (or not) to the
//! bridge/host kernel layer.

use super::directory::NAME_MAX;
use super::error::{Error, Result};
use super::image::Engine;

/// Returns the final component of `path`.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns the portion of `path` up to and including the final `/`.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => "",
    }
}

impl Engine {
    /// Resolves `path` to an inode index.
    pub(super) fn resolve(&self, path: &str) -> Result<u32> {
        if path == "/" {
            return Ok(self.root_ino);
        }

        let mut current = self.root_ino;
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        for (i, name) in components.iter().enumerate() {
            if name.len() > NAME_MAX {
                return Err(Error::InvalidName);
            }
            let inode = self.read_inode(current);
            let block = inode.dptrs[0] as u32;
            let found = self.dir_lookup(block, name).ok_or(Error::NotFound)?;
            let is_last = i == components.len() - 1;
            if is_last {
                current = found;
            } else {
                let found_inode = self.read_inode(found);
                if !super::inode::is_dir(found_inode.mode) {
                    return Err(Error::NotFound);
                }
                current = found;
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_and_parent() {
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/a"), "a");
        assert_eq!(parent_path("/a/b/c"), "/a/b");
        assert_eq!(parent_path("/a"), "/");
    }
}
