//! Cannonfile actions.
//!
//! A cannonfile declares named actions grouped by kind. Each action is
//! identified as `kind.label` and may declare `depends` on other actions by
//! that identity.
//!
//! # Action Kinds
//!
//! - [`ActionKind::Contract`] - deploy a contract from an artifact
//! - [`ActionKind::Invoke`] - call functions on deployed contracts
//! - [`ActionKind::Import`] - build another package and nest its outputs
//! - [`ActionKind::Run`] - run caller-supplied logic against the context
//! - [`ActionKind::Keeper`] - register an off-chain automation rule
//!
//! Global settings live under `[setting.*]` and are not actions.

mod types;

pub use types::*;
