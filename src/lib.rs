pub mod engine;

pub use engine::{Attr, Engine, Error, Result, BLOCK_SIZE, IMAGE_SIZE, MAX_FILE_SIZE};
