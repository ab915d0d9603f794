//! End-to-end tests through the `Database` connection handle.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! against a file-backed or in-memory store.

#![cfg(test)]

mod helpers;

mod test_fault_injection;
mod test_persistence;
mod test_prefix_search;
mod test_reverse_delete;
mod test_sequence_formats;
mod test_small_cache;
mod test_split_chain;
