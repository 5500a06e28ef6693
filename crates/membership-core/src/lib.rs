//! Substrate-agnostic cluster membership and leader-election reconciliation.
//!
//! This crate depends on no specific coordination substrate: it defines
//! the two ports ([`ports::MembershipExecutor`], [`ports::LeaderElectionExecutor`])
//! a concrete adapter implements, and drives them through a single-writer
//! [`reconciler::Reconciler`] exposed to callers as [`connector::Connector`].

pub mod actions;
pub mod clock;
pub mod config;
pub mod connector;
pub mod error;
pub mod ports;
pub mod reconcile_actions;
pub mod reconciler;
pub mod state;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use connector::{Connector, ConnectorBuilder};
pub use error::ReconcileError;
