//! cannon-lib: deployment builds for cannonfiles
//!
//! This crate turns a declarative cannonfile into an executed deployment:
//! - `action`: the cannonfile model and its named actions
//! - `graph`: the validated action graph and its state layers
//! - `steps`: how each action kind computes its fingerprint and executes
//! - `build`: the orchestrator, with record reuse and layered rebuilds
//! - `store`: persisted definitions, action records and layer states
//! - `trace`: revert decoding and call traces for failed transactions

pub mod abi;
pub mod action;
pub mod artifacts;
pub mod build;
pub mod chain;
pub mod consts;
pub mod context;
pub mod graph;
pub mod steps;
pub mod store;
pub mod template;
pub mod trace;
pub mod util;
