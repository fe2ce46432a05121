mod archives;
mod chunks;
pub mod db;
pub mod models;
mod sessions;
mod submissions;
mod tables;

pub use db::{Database, DatabaseError, PurgeStats};
pub use tables::*;
