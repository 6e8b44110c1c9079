//! Beacon Daemon - WebSocket connection registry, broadcast and shutdown
//!
//! This crate provides the core infrastructure for the Beacon daemon:
//! - `registry` - Connection registry actor owning all live-session state
//! - `broadcast` - Fan-out, personal sends, probes and forced close
//! - `sweeper` / `notifier` - Periodic liveness sweep and status broadcast
//! - `shutdown` - Signal-driven drain with bounded wait and escalation
//! - `server` - axum HTTP/WebSocket surface
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       beacond daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│     RegistryActor           │   │
//! │  │  (axum, /ws)    │     │  (connection state owner)   │   │
//! │  └────────┬────────┘     └──────────────▲──────────────┘   │
//! │           │ sessions                    │ snapshots         │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐   │
//! │  │ SessionHandler  │────▶│        Broadcaster          │   │
//! │  │  (per client)   │     └──────────────▲──────────────┘   │
//! │  └─────────────────┘                    │                   │
//! │        LivenessSweeper ─────────────────┤                   │
//! │        NotificationScheduler ───────────┤                   │
//! │        ShutdownCoordinator (signals) ───┘                   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the workspace panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broadcast;
pub mod config;
pub mod notifier;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod sweeper;
pub mod transport;
