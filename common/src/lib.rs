pub mod mmap;

pub use mmap::Mmap;
