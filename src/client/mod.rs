//! # Client Components
//!
//! One [`Client`] per remote peer. It connects once, then exchanges JSON
//! envelopes in request/response turns over the framed [`Connection`].
//!
//! [`Connection`]: crate::common::connection::Connection

pub mod client;

pub use client::Client;
