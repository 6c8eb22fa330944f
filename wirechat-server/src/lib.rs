//! Wirechat: a single-room WebSocket chat relay.
//!
//! Clients connect over WebSocket, claim a nickname with `NICK`, and
//! exchange line-oriented text and image messages that are broadcast to
//! everyone, moderated against a forbidden-word list, persisted to a
//! day-partitioned log and replayed to newcomers.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod history;
pub mod moderation;
pub mod oplog;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod web;
