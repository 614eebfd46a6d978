//! Crate for driving small Arduino-based rovers from a host computer over a
//! serial link.
//!
//! The link is a bare byte stream subject to noise, dropped bytes and device
//! resets, so this crate layers its own record structure on top: every
//! [`Message`](message::Message) is CRC-checked and travels inside a
//! flag-delimited, byte-stuffed [`frame`]. A [`Session`](connection::Session)
//! owns the open transport, assigns outbound message ids, and runs a reader
//! task that reassembles inbound frames into a queue the application drains
//! at its own pace.
//!
//! On top of the transport sits the [`Rover`](control::Rover) control loop: a
//! small behavioral state machine that patrols on a dwell timer, reacts to
//! firmware NACKs and range reports, and supervises reconnection when the
//! link drops.

pub mod crc;
pub mod decode;
pub mod devices;
pub mod encode;
pub mod frame;
pub mod message;

#[cfg(feature = "session")]
pub mod connection;
#[cfg(feature = "session")]
pub mod control;
