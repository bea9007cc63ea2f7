//! Isolated environment: readiness checks and the resumable installer.
//!
//! Installer stages never talk to each other directly. Each one leaves a
//! filesystem marker and the next run re-reads those markers, so an install
//! interrupted by a crash or a closed host resumes where it stopped.

mod archive;
pub mod backend;
pub mod installer;
pub mod lease;
pub mod stage;
pub mod validator;
