//! Core primitives for the mesh: errors, time/ids, canonical hashing,
//! the store layout, the hash-chained ledger, content-addressable storage,
//! seals, and Merkle roots.

pub mod canon;
pub mod cas;
pub mod config;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod seal;
pub mod store;
pub mod time;
