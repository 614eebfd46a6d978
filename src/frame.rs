//! PPP-style framing for the rover serial link.
//!
//! Every message travels inside a frame delimited by [`FRAME_FLAG`] at both
//! ends. Payload bytes that collide with the flag or escape values are
//! preceded by [`FRAME_ESC`] and transmitted literally, so the delimiters
//! stay unambiguous no matter what the message contains.

use thiserror::Error;

/// Marks the start and end of a frame.
pub const FRAME_FLAG: u8 = 0x0C;

/// Escapes payload bytes that collide with [`FRAME_FLAG`] or [`FRAME_ESC`].
pub const FRAME_ESC: u8 = 0x1B;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame is not delimited by flag bytes on both ends")]
    BadDelimiters,

    #[error("Frame ends with an escape byte that has no following literal")]
    TruncatedEscape,
}

/// Wraps a message into a frame, escaping any payload byte that collides
/// with a framing value.
pub fn wrap(message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(message.len() + 2);
    frame.push(FRAME_FLAG);

    for &byte in message {
        if byte == FRAME_FLAG || byte == FRAME_ESC {
            frame.push(FRAME_ESC);
        }
        frame.push(byte);
    }

    frame.push(FRAME_FLAG);
    frame
}

/// Strips the delimiters from a complete frame and undoes the escaping,
/// yielding the original message bytes.
pub fn unwrap(frame: &[u8]) -> Result<Vec<u8>, FrameError> {
    if frame.len() < 2 || frame[0] != FRAME_FLAG || frame[frame.len() - 1] != FRAME_FLAG {
        return Err(FrameError::BadDelimiters);
    }

    let mut message = Vec::with_capacity(frame.len() - 2);
    let mut escaped = false;

    // Scan everything but the closing flag. An escape pending when we reach
    // it would consume the delimiter itself, so the frame is malformed.
    for &byte in &frame[..frame.len() - 1] {
        if escaped {
            message.push(byte);
            escaped = false;
        } else if byte == FRAME_ESC {
            escaped = true;
        } else if byte != FRAME_FLAG {
            message.push(byte);
        }
    }

    if escaped {
        return Err(FrameError::TruncatedEscape);
    }

    Ok(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    AwaitingStart,
    InFrame,
    EscapePending,
}

/// Incremental frame assembler for a continuous byte stream.
///
/// The serial line has no record boundaries of its own, so the receive path
/// feeds every byte read off the wire through this state machine and acts on
/// each completed payload it yields. Bytes seen before the first flag are
/// line noise and are dropped.
#[derive(Debug)]
pub struct FrameAssembler {
    state: AssemblerState,
    buf: Vec<u8>,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            state: AssemblerState::AwaitingStart,
            buf: Vec::new(),
        }
    }

    /// Consumes one byte from the stream. Returns the de-escaped payload of a
    /// frame once its closing flag arrives.
    ///
    /// Empty payloads (back-to-back flags, as seen between the closing flag
    /// of one frame and the opening flag of the next) are discarded rather
    /// than yielded.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            AssemblerState::AwaitingStart => {
                if byte == FRAME_FLAG {
                    self.state = AssemblerState::InFrame;
                }
                None
            }
            AssemblerState::InFrame => match byte {
                // A flag both closes the current frame and opens the next
                // one. A device reset mid-frame drops the closing flag, so
                // treating every flag as an opener keeps the frame after a
                // truncated one intact. Empty payloads are idle flags.
                FRAME_FLAG => {
                    if self.buf.is_empty() {
                        return None;
                    }
                    Some(std::mem::take(&mut self.buf))
                }
                FRAME_ESC => {
                    self.state = AssemblerState::EscapePending;
                    None
                }
                _ => {
                    self.buf.push(byte);
                    None
                }
            },
            AssemblerState::EscapePending => {
                self.buf.push(byte);
                self.state = AssemblerState::InFrame;
                None
            }
        }
    }
}
