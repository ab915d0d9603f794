// Record-oriented storage for a genome-assembly database.
//
// Layers, bottom up:
//  - Record stores: an append-only database file or an in-memory store,
//    both addressed by record id and accessed through locked views
//  - Object interface: typed create / lock / read / write over any store
//  - Cache table: decoded records kept resident, with dirty tracking and
//    explicit commit
//  - B+Tree name indices whose nodes are themselves cached records
//  - Database: the connection handle tying the header record to the indices

pub mod config;
pub mod database;
pub mod objects;
pub mod storage;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, StoreConfig};
pub use database::{Database, DatabaseError, StoreOptions};
pub use storage::indexes::IndexKind;
pub use storage::record::{LockMode, RecordId, View};
