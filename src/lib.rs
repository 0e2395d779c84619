//! SSH tunnel lifecycle engine: local/remote/dynamic port forwarding
//! with an embedded SOCKS5 server and Clash config export.
//!
//! The crate exposes no transport of its own (no HTTP/IPC server).
//! `engine::TunnelEngine` is meant to be embedded behind whatever
//! front-end an application wires up, driven by a `repository::Repository`
//! implementation the embedder supplies.

pub mod clash;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod host_service;
pub mod logging;
pub mod models;
pub mod port;
pub mod relay;
pub mod repository;
pub mod socks5;
pub mod ssh;
pub mod traffic_meter;
