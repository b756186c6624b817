//! x402 EVM facilitator — verifies signed payment authorizations and settles
//! them on-chain, paying gas on the payer's behalf.
//!
//! The settlement engine lives in the core [`x402_evm`] crate; this crate
//! provides the HTTP server: configuration, shared state, the REST routes
//! (`/verify`, `/settle`, `/supported`, `/health`, `/api/info`, `/metrics`),
//! and Prometheus metrics.
//!
//! # Modules
//!
//! - [`config`] — environment-driven configuration
//! - [`state`] — shared [`AppState`](state::AppState)
//! - [`routes`] — HTTP endpoints and response assembly
//! - [`metrics`] — Prometheus metrics for verify/settle operations

pub mod config;
pub mod metrics;
pub mod routes;
pub mod state;
