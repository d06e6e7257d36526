//! The storage engine: a POSIX-like hierarchy backed by a single
//! memory-mapped image file. Everything here is synchronous and takes
//! `&mut self`; serializing concurrent access is the caller's job (see
//! `bridge.rs`).

mod alloc;
pub mod bitmap;
mod directory;
mod dispatcher;
pub mod error;
mod file_data;
mod image;
mod inode;
mod path;
mod raw;

pub use dispatcher::Attr;
pub use error::{Error, Result};
pub use image::{Engine, BLOCK_SIZE, IMAGE_SIZE, MAX_FILE_SIZE};
