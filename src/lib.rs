//! Core crate of the aurum permissioned proof-of-authority chain.
//!
//! The modules compose the block-production and state-transition
//! pipeline: `kv` and `trie` provide the authenticated storage layers,
//! `state` the journaled account model, `evm` and `processor` execute
//! transactions, and `mempool`, `schedule`, `builder`, `validator` and
//! `chain` turn pending transactions into canonical blocks. `node` wires
//! everything behind [`node::Node`] and [`node::NodeHandle`], driven by
//! [`config::NodeConfig`]. Wire payload shapes for the external
//! transport live in [`types::Message`].

pub mod builder;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod evm;
pub mod genesis;
pub mod kv;
pub mod mempool;
pub mod node;
pub mod params;
pub mod processor;
pub mod schedule;
pub mod state;
pub mod trie;
pub mod types;
pub mod validator;
