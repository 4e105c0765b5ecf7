//! Bridge engine
//!
//! Drives every swap from creation to a terminal state:
//! - Issues deposit addresses and persists new swaps
//! - Polls the confirmation oracle for active swaps on each tick
//! - Enforces expiry and oracle-outage escalation
//! - Finalizes confirmed swaps on the destination ledger, at most once

mod bridge;
mod guard;

pub use bridge::BridgeEngine;
