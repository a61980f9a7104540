//! Integration tests for the signaling orchestrator
//!
//! Every scenario drives a real `SignalingOrchestrator` against the scripted
//! collaborators from `crabsignal::testing` and inspects what reached the
//! primitive and the bus.
//!
//! Run with: cargo test --test orchestrator

mod harness;
mod lifecycle;
mod loopback;
mod negotiation;
mod transport;
