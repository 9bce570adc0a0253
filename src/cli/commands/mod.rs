//! Command implementations for the `bd` binary.

pub mod completions;
pub mod daemon;
pub mod doctor;
pub mod info;
pub mod init;
pub mod sync;
pub mod validate;
