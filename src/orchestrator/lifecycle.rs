//! The per-active-node lifecycle state machine (§4.H):
//! `idle → entering → active ⇄ navigating → active | error | final`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Before `start`.
    Idle,
    /// Bindings and entry invocations running.
    Entering,
    /// Awaiting events from the renderer.
    Active,
    /// Interstep pipeline + transition resolution in progress.
    Navigating,
    /// Surfaced to the renderer; only `RETRY`/`BACK`/`GOTO` accepted.
    Error,
    /// Terminal leaf; further events are dropped.
    Final,
}
