//! The transport session: an open link to the rover's microcontroller.
//!
//! A [`Session`] owns the write half of the byte-stream transport and the
//! outbound message-id counter. The read half is handed to a dedicated
//! reader task at construction; it reassembles frames from the raw byte
//! stream, decodes them, and feeds the inbound queue so no bytes are lost
//! while the control loop is busy elsewhere. The queue is the only thing
//! shared across that boundary.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, trace, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    encode::{Encode, EncodeError},
    frame::{self, FrameAssembler},
    message::Message,
};

#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "serial")]
pub use serial::{find_devices, ConnectError, SerialDevice, SessionConfig};

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Not connected to the rover")]
    NotConnected,

    #[error("Message encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// One item delivered by the receive path, in frame-arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// A frame that decoded and validated.
    Message(Message),

    /// A frame that failed framing or validation. Kept in-band so the
    /// consumer sees exactly what arrived, in order.
    Invalid,
}

/// An open session with the rover.
///
/// Generic over the transport so the same code path runs against a real
/// serial port or an in-memory stream in tests.
pub struct Session<T> {
    writer: WriteHalf<T>,
    inbound: UnboundedReceiver<Inbound>,
    connected: Arc<AtomicBool>,
    last_message_id: u32,
    reader: JoinHandle<()>,
}

impl<T: AsyncRead + AsyncWrite + Send + 'static> Session<T> {
    /// Wraps an already-open byte-stream transport and spawns the reader
    /// task for it.
    pub fn from_transport(transport: T) -> Self {
        let (read_half, writer) = tokio::io::split(transport);
        let connected = Arc::new(AtomicBool::new(true));
        let (queue, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_task(read_half, queue, connected.clone()));

        Self {
            writer,
            inbound,
            connected,
            last_message_id: 0,
            reader,
        }
    }

    /// Whether the transport is still believed to be up. Goes false on any
    /// read or write failure and stays false until a new session is opened.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The id assigned to the most recent outbound message.
    pub fn last_message_id(&self) -> u32 {
        self.last_message_id
    }

    /// Sends one command message, returning its assigned id.
    ///
    /// Fails without touching the transport when the session is
    /// disconnected. The id counter advances *before* the write, so a failed
    /// write burns its id: sends are at-most-once and the returned `Result`
    /// is the only completion signal.
    pub async fn send(
        &mut self,
        module: u8,
        command_type: u8,
        data: u32,
        acknowledge_id: u32,
    ) -> Result<u32, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        self.last_message_id = self.last_message_id.wrapping_add(1);
        let message = Message {
            message_id: self.last_message_id,
            acknowledge_id,
            module,
            command_type,
            data,
        };

        let framed = frame::wrap(&message.encode()?);
        trace!("Sending frame: {framed:x?}");

        if let Err(e) = self.writer.write_all(&framed).await {
            self.connected.store(false, Ordering::Relaxed);
            return Err(SendError::Io(e));
        }
        if let Err(e) = self.writer.flush().await {
            self.connected.store(false, Ordering::Relaxed);
            return Err(SendError::Io(e));
        }

        Ok(message.message_id)
    }

    /// Sends a command that is not a reply to anything.
    pub async fn send_command(
        &mut self,
        module: u8,
        command_type: u8,
        data: u32,
    ) -> Result<u32, SendError> {
        self.send(module, command_type, data, 0).await
    }

    /// Waits for the next inbound item. Returns `None` once the reader task
    /// has stopped and the queue is drained.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Returns the next inbound item if one is already queued.
    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.inbound.try_recv().ok()
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reassembles and decodes frames off the transport until it goes away.
///
/// Runs as its own task so byte-level reads are never starved by
/// application logic. Every completed frame ends up on the queue, valid or
/// not.
async fn read_task<T: AsyncRead + Send>(
    mut reader: ReadHalf<T>,
    queue: UnboundedSender<Inbound>,
    connected: Arc<AtomicBool>,
) {
    let mut assembler = FrameAssembler::new();
    let mut buf = [0u8; 64];

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Transport closed by peer");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Transport read failed: {e}");
                break;
            }
        };

        for &byte in &buf[..n] {
            let Some(payload) = assembler.push(byte) else {
                continue;
            };
            let item = match Message::decode(&payload) {
                Ok(message) => {
                    trace!("Received message: {message:?}");
                    Inbound::Message(message)
                }
                Err(e) => {
                    warn!("Discarding invalid frame: {e}");
                    Inbound::Invalid
                }
            };
            if queue.send(item).is_err() {
                // Session dropped, nobody left to read the queue
                break 'read;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::{Inbound, Session};
    use crate::{
        encode::Encode,
        frame::{self, FrameAssembler},
        message::{cmds, modules, Message},
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Reads one complete frame off the far end of the link and decodes it.
    async fn read_message(far: &mut DuplexStream) -> Message {
        let mut assembler = FrameAssembler::new();
        let mut byte = [0u8; 1];
        loop {
            far.read_exact(&mut byte).await.unwrap();
            if let Some(payload) = assembler.push(byte[0]) {
                return Message::decode(&payload).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn monotonic_ids_start_at_one() {
        let (transport, mut far) = tokio::io::duplex(1024);
        let mut session = Session::from_transport(transport);

        for expected in 1..=5u32 {
            let id = session
                .send_command(modules::MOTOR, cmds::MOTOR_FORWARD, 255)
                .await
                .unwrap();
            assert_eq!(id, expected);

            let message = read_message(&mut far).await;
            assert_eq!(message.message_id, expected);
            assert_eq!(message.acknowledge_id, 0);
            assert_eq!(message.data, 255);
        }
    }

    #[tokio::test]
    async fn disconnected_send_is_a_noop() {
        let (transport, far) = tokio::io::duplex(1024);
        let mut session = Session::from_transport(transport);

        drop(far);
        while session.is_connected() {
            tokio::task::yield_now().await;
        }

        let before = session.last_message_id();
        let result = session
            .send_command(modules::MOTOR, cmds::MOTOR_STOP, 0)
            .await;
        assert!(matches!(result, Err(super::SendError::NotConnected)));

        // The id counter must not advance for a send that never happened
        assert_eq!(session.last_message_id(), before);
    }

    #[tokio::test]
    async fn malformed_frame_is_isolated() {
        let (transport, mut far) = tokio::io::duplex(1024);
        let mut session = Session::from_transport(transport);

        let message = Message {
            message_id: 1,
            acknowledge_id: 0,
            module: modules::DISTANCE_SENSOR,
            command_type: cmds::DISTANCE_DATA,
            data: 57,
        };

        // A frame truncated by a device reset, then a well-formed one
        let mut stream = vec![frame::FRAME_FLAG, 0xDE, 0xAD, 0xBE];
        stream.extend(frame::wrap(&message.encode().unwrap()));
        far.write_all(&stream).await.unwrap();

        assert_eq!(session.recv().await, Some(Inbound::Invalid));
        assert_eq!(session.recv().await, Some(Inbound::Message(message)));
        assert_eq!(session.try_recv(), None);
    }

    #[tokio::test]
    async fn bad_checksum_arrives_as_invalid() {
        let (transport, mut far) = tokio::io::duplex(1024);
        let mut session = Session::from_transport(transport);

        let mut encoded = Message {
            message_id: 3,
            acknowledge_id: 0,
            module: modules::MOTOR,
            command_type: cmds::MOTOR_FORWARD_NACK,
            data: 0,
        }
        .encode()
        .unwrap();
        encoded[0] ^= 0xFF;

        far.write_all(&frame::wrap(&encoded)).await.unwrap();
        assert_eq!(session.recv().await, Some(Inbound::Invalid));
    }
}
