//! Named B+Tree indices rooted in the database header.

pub mod name;

pub use name::{IndexKind, ParseIndexError};
