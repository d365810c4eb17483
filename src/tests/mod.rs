//! Consolidated test modules.
//!
//! `fixtures` holds the contract and helpers shared by unit tests across the
//! crate; `bridge_e2e` drives the exported C functions end to end.

pub(crate) mod fixtures;

mod bridge_e2e;
