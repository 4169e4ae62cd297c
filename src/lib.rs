//! Ephemeral photo sharing: uploads land in a small JSON-backed store and a
//! background sweeper deletes them once they have faded out.

pub mod config;
pub mod db;
pub mod error;
pub mod gallery;
pub mod persistence;
pub mod server;
pub mod sweeper;
pub mod upload;
