//! Gatekeeper - per-client rate limiting for the membership portal API
//!
//! This crate implements fixed-window rate limiting in front of the portal's
//! HTTP API. Requests are mapped to named policies by path prefix, counted per
//! client and policy in an in-process window store, and rejected with 429 once
//! a client exceeds its quota. Counters are per process; nothing is shared
//! between instances.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ratelimit;
