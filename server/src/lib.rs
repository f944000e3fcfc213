//! Purchase settlement and delivery backend for a decentralized data marketplace.
//! This crate exposes internal modules for integration testing and the `seal` tool.
//! The server entry point is in main.rs.

pub mod catalog;
pub mod compute;
pub mod config;
pub mod content;
pub mod crypto;
pub mod delivery;
pub mod ledger;
pub mod routes;
pub mod state;
