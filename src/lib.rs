//! Off-chain coordinator for Precog encrypted prediction markets.
//!
//! Markets live on a Solana ledger program; bets are submitted as opaque
//! ciphertexts and resolved by an external MPC network. This crate holds the
//! market lifecycle state machine, the ledger and MPC boundaries, and the
//! coordinator that drives a market from its deadline to settlement.

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod mpc;
pub mod protocol;
pub mod server;
pub mod state;
pub mod store;
