//! Test utilities for safe keeper components.
//!
//! This crate provides the fixtures shared by the integration tests across this workspace:
//! deterministic secp256k1 keys, request builders, an in-memory [`ChainRpc`] with failure
//! injection, and a throwaway PostgreSQL database per test with the keeper migrations applied.
//!
//! [`ChainRpc`]: safe_keeper_rpc_client::ChainRpc

#![allow(missing_docs)]

pub mod chain;
pub mod db;
pub mod keys;
pub mod requests;
