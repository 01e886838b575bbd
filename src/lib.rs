//! # Flowspire: declarative flow orchestrator
//!
//! Flowspire turns a JSON flow document into a running, hierarchical state
//! machine that drives a user-facing multi-step process — wizards, sales
//! funnels, checkouts. Three subsystems do the real work:
//!
//! - **Flow compiler** ([`compiler`]) — parses, normalizes, and validates a
//!   flow document into an in-memory machine node tree.
//! - **Runtime orchestrator** ([`orchestrator`]) — drives the compiled
//!   machine: transitions, interstep pipelines, retry/cache/severity
//!   semantics, snapshotting, and renderer notification.
//! - **Action & expression engines** ([`action`], [`template`], [`logic`]) —
//!   templated strings, JSON-logic condition trees, and structured actions
//!   (HTTP, assign, clear, track, delay) evaluated against the live context.
//!
//! The core never renders UI and never depends on a concrete HTTP library;
//! external collaborators are consumed through the [`registry`] capability
//! table.
//!
//! ## Quick start
//!
//! ```
//! use flowspire::compiler::{compile, FlowDocument};
//! use flowspire::registry::CapabilityRegistry;
//!
//! let document: FlowDocument = serde_json::from_value(serde_json::json!({
//!     "id": "checkout",
//!     "initial": "cart",
//!     "context": {},
//!     "states": {
//!         "cart": { "on": { "NEXT": "paid" } },
//!         "paid": { "type": "final" }
//!     }
//! }))
//! .unwrap();
//!
//! let registry = CapabilityRegistry::new();
//! let compiled = compile(&document, false, &registry).unwrap();
//! assert_eq!(compiled.initial, "cart");
//! ```
//!
//! ## Module guide
//!
//! - [`path`] — dotted-path get/set/unset/merge over `serde_json::Value`.
//! - [`template`] — `{{expr}}` string interpolation against a data root.
//! - [`logic`] — the closed JSON-logic operator set.
//! - [`registry`] — named capability lookup (`services`, `guards`, ...).
//! - [`action`] — the action runner, including the `http` action pipeline.
//! - [`transition`] — target resolution for a node's `on[event]` table.
//! - [`compiler`] — flow document parse/normalize/validate/emit.
//! - [`orchestrator`] — the actor and its lifecycle state machine.
//! - [`cache`] — the TTL action-result cache.
//! - [`snapshot`] — session snapshot persistence.
//! - [`state`] — the versioned runtime state channels.
//! - [`errors`] — the closed error taxonomy and severity policies.
//! - [`config`] — orchestrator configuration and its builder.
//! - [`event_bus`] — ambient diagnostics, independent of renderer `subscribe`.
//! - [`telemetry`] — structured console rendering of events and errors.

pub mod action;
pub mod cache;
pub mod channels;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod event_bus;
pub mod logic;
pub mod orchestrator;
pub mod path;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod telemetry;
pub mod template;
pub mod transition;
