//! Splat artifact handling: header gate, vertex decoding, `.splat` and
//! standard PLY export.
//!
//! The gate only reads the PLY header and is cheap enough to run after every
//! inference. Decoding and conversion are opt-in.

pub mod color;
pub mod error;
pub mod gate;
pub mod ply;
pub mod splat;
pub mod standard;

pub use error::{ArtifactError, Result};
pub use gate::{check_header, validate_splat_artifact, ArtifactReport, REQUIRED_FIELDS};
pub use ply::header::{PlyFormat, PlyHeader};
pub use ply::reader::{read_splats, SplatCloud, SplatPoint};
pub use splat::{splat_path_for, write_splat_file, SPLAT_RECORD_SIZE};
pub use standard::{write_standard_ply, STANDARD_FIELDS};
