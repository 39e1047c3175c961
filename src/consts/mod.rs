pub use fs::*;

pub mod fs;
