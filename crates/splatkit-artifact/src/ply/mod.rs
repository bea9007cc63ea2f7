//! Minimal PLY support: header parsing and vertex decoding.

pub mod header;
pub mod reader;
