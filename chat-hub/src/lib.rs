//! Real-time broadcast hub for a chat room.
//!
//! Each connected participant is a session with a bounded outbound queue
//! and a send-pump task. One control loop owns the registry of sessions and
//! performs every registration, removal and broadcast fan-out, so the
//! registry needs no lock. Delivery is best-effort: a recipient whose queue
//! is full simply misses that message.
//!
//! - [`hub`] is the control loop and its [`hub::HubHandle`] front end.
//! - [`queue`] is the drop-on-full per-session buffer.
//! - [`session`] holds session state, the send-pump and one-shot teardown.
//! - [`adapter`] bridges a duplex byte stream to the hub.
//! - [`message`] defines chat messages and the JSON line protocol.
//! - [`server`] and [`client`] wire everything to TCP and a terminal;
//!   [`cli`] and [`config`] hold their settings.

pub mod adapter;
pub mod cli;
pub mod client;
pub mod config;
pub mod hub;
pub mod message;
pub mod queue;
pub mod server;
pub mod session;
