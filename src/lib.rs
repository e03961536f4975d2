//! Synchronization core for a shared virtual war-board session.
//!
//! Several independently connected clients mutate a shared set of game
//! documents (board, per-player hands, a TTL event log, presence) with no
//! central arbiter: consistency comes from atomic read-modify-write
//! transactions against a remote state store, plus a client-local staging
//! machine that turns a two-step pick-up/drop gesture into a single commit.
//!
//! The store itself is external; [`store::StateStore`] captures the contract
//! it must honor, and [`store::MemoryStore`] is an in-process reference
//! backend. [`session::Session`] is the composition root a presentation
//! layer talks to.

pub mod action;
pub mod clock;
pub mod config;
mod error;
pub mod events;
pub mod model;
pub mod ops;
pub mod presence;
pub mod projector;
pub mod session;
pub mod store;

pub use error::SyncError;
