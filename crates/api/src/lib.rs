//! HTTP gateway: webhook intake plus health and readiness probes.

pub mod app;
