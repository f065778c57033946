//! Wire layer for the control protocol.
//!
//! Every message in either direction is one length-prefixed frame containing a
//! JSON [`Envelope`](protocol::Envelope).
//!
//! - **protocol**: the envelope and the command/event payload types
//! - **codec**: JSON framing codec for any AsyncRead/AsyncWrite transport

pub mod codec;
pub mod protocol;
