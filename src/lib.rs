//! Vault orchestrator - cross-chain vault deposits and withdrawals through a
//! delegated relay wallet
//!
//! A flow is planned from the source asset, source chain and vault chain,
//! the relay wallet is topped up with gas when needed, and the planned
//! transfer/swap/bridge/vault steps run strictly in order with progress
//! published on a broadcast stream.

pub mod api;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod operations;
pub mod services;
pub mod session;
pub mod tx;

#[cfg(test)]
mod testing;
