//! SipSync Server - Completion push fan-out.
//!
//! This crate provides the server side of SipSync, responsible for:
//! - Receiving task write notifications from the document store
//! - Authenticating them with a shared trigger secret
//! - Pushing one "task completed" message to every other user's devices
//!
//! # Architecture
//!
//! The server is stateless. Each trigger call is handled on its own by the
//! [`fanout::FanOut`] handler, which reads profiles through a
//! [`sipsync_core::store::ProfileDirectory`] and delivers through a
//! [`push::PushService`].

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod push;
pub mod routes;
