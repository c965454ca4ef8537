//! Network and filesystem plumbing shared by the pipeline stages.

pub mod archive;
pub mod client;
pub mod download;
pub mod hashing;
