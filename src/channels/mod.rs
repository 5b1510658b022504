//! Channels module - the adapter interface between messaging platforms and
//! the router.
//!
//! Concrete platform adapters live outside this crate; they implement
//! [`ChannelAdapter`] for sending and feed [`AdapterEvent`]s to the router.

mod types;

pub use types::{AdapterEvent, ChannelAdapter, SendReceipt};
