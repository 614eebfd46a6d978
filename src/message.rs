//! The message records exchanged with the rover firmware.
//!
//! Two record types share the same header and checksum rules. [`Message`] is
//! the canonical fixed-width record carried by every command and report.
//! [`Datagram`] trades the fixed `data` word for a length-prefixed byte
//! payload; it is a separate encoding, not interoperable with [`Message`].
//!
//! All multi-byte fields are little-endian. The checksum is CRC-32 computed
//! over the entire serialized record with the checksum field set to zero,
//! then written into the final four bytes.

use crate::{
    crc::ROVER_CRC32,
    decode::{Decode, DecodeError},
    encode::{Encode, EncodeError},
};

/// Serialized size of a fixed-width [`Message`].
pub const MESSAGE_LEN: usize = 18;

/// Serialized size of a [`Datagram`] with an empty payload.
pub const DATAGRAM_MIN_LEN: usize = 15;

/// Module identifiers addressing the firmware subsystems.
///
/// These values are baked into the firmware and must match it exactly.
pub mod modules {
    /// The microcontroller supervisor itself.
    pub const ARDUINO: u8 = 0x30;
    pub const DISTANCE_SENSOR: u8 = 0x31;
    pub const MOTOR: u8 = 0x32;
    pub const ACCELERATION_SENSOR: u8 = 0x33;
    pub const COMPASS_SENSOR: u8 = 0x34;
}

/// Command identifiers, scoped to their module.
///
/// Commands are even; the NACK reporting failure of a command is the odd
/// value right after it (see [`nack_of`]).
pub mod cmds {
    // Arduino supervisor
    pub const ARDUINO_START: u8 = 0x64;
    pub const ARDUINO_START_NACK: u8 = 0x65;
    pub const ARDUINO_STOP: u8 = 0x66;
    pub const ARDUINO_STOP_NACK: u8 = 0x67;
    pub const ARDUINO_RESTART: u8 = 0x68;
    pub const ARDUINO_RESTART_NACK: u8 = 0x69;

    // Motor
    pub const MOTOR_FORWARD: u8 = 0x64;
    pub const MOTOR_FORWARD_NACK: u8 = 0x65;
    pub const MOTOR_BACK: u8 = 0x66;
    pub const MOTOR_BACK_NACK: u8 = 0x67;
    pub const MOTOR_LEFT: u8 = 0x68;
    pub const MOTOR_LEFT_NACK: u8 = 0x69;
    pub const MOTOR_RIGHT: u8 = 0x6A;
    pub const MOTOR_RIGHT_NACK: u8 = 0x6B;
    pub const MOTOR_STOP: u8 = 0x6C;
    pub const MOTOR_STOP_NACK: u8 = 0x6D;

    // Distance sensor
    pub const DISTANCE_START: u8 = 0x64;
    pub const DISTANCE_START_NACK: u8 = 0x65;
    pub const DISTANCE_STOP: u8 = 0x66;
    pub const DISTANCE_STOP_NACK: u8 = 0x67;
    /// Streamed range report; distance in centimeters in `data`.
    pub const DISTANCE_DATA: u8 = 0x68;
}

/// Returns the NACK identifier paired with a command.
pub const fn nack_of(cmd: u8) -> u8 {
    cmd | 1
}

/// Whether a command identifier is a NACK.
pub const fn is_nack(cmd: u8) -> bool {
    cmd & 1 == 1
}

/// The fixed-width message record.
///
/// Wire layout:
///
/// ```text
/// message_id     u32    sender-assigned, starts at 1
/// acknowledge_id u32    0 = not a reply, else the message being answered
/// module         u8
/// command_type   u8
/// data           u32
/// checksum       u32    CRC-32, this field zeroed during computation
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub message_id: u32,
    pub acknowledge_id: u32,
    pub module: u8,
    pub command_type: u8,
    pub data: u32,
}

impl Message {
    /// Whether this message is a reply to one of ours.
    pub fn is_reply(&self) -> bool {
        self.acknowledge_id != 0
    }

    /// Decodes and validates a message from the payload of one frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != MESSAGE_LEN {
            return Err(DecodeError::LengthMismatch {
                expected: MESSAGE_LEN,
                actual: bytes.len(),
            });
        }

        let mut data = bytes;
        let message = Self {
            message_id: u32::decode(&mut data)?,
            acknowledge_id: u32::decode(&mut data)?,
            module: u8::decode(&mut data)?,
            command_type: u8::decode(&mut data)?,
            data: u32::decode(&mut data)?,
        };
        let received = u32::decode(&mut data)?;

        let computed = crc_with_zeroed_checksum(bytes);
        if received != computed {
            return Err(DecodeError::ChecksumMismatch {
                expected: computed,
                actual: received,
            });
        }

        Ok(message)
    }
}

impl Encode for Message {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut encoded = Vec::with_capacity(MESSAGE_LEN);
        encoded.extend(self.message_id.to_le_bytes());
        encoded.extend(self.acknowledge_id.to_le_bytes());
        encoded.push(self.module);
        encoded.push(self.command_type);
        encoded.extend(self.data.to_le_bytes());
        encoded.extend([0u8; 4]);

        let checksum = ROVER_CRC32.checksum(&encoded);
        encoded[MESSAGE_LEN - 4..].copy_from_slice(&checksum.to_le_bytes());

        Ok(encoded)
    }
}

/// The variable-length message record.
///
/// Shares the header and checksum rules with [`Message`] but replaces the
/// fixed `data` word with a `u8` length prefix followed by that many payload
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub message_id: u32,
    pub acknowledge_id: u32,
    pub module: u8,
    pub command_type: u8,
    pub data: Vec<u8>,
}

impl Datagram {
    /// Decodes and validates a datagram from the payload of one frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < DATAGRAM_MIN_LEN {
            return Err(DecodeError::LengthMismatch {
                expected: DATAGRAM_MIN_LEN,
                actual: bytes.len(),
            });
        }

        let mut data = bytes;
        let message_id = u32::decode(&mut data)?;
        let acknowledge_id = u32::decode(&mut data)?;
        let module = u8::decode(&mut data)?;
        let command_type = u8::decode(&mut data)?;
        let data_len = u8::decode(&mut data)? as usize;

        let expected = DATAGRAM_MIN_LEN + data_len;
        if bytes.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let payload = data[..data_len].to_vec();
        data = &data[data_len..];
        let received = u32::decode(&mut data)?;

        let computed = crc_with_zeroed_checksum(bytes);
        if received != computed {
            return Err(DecodeError::ChecksumMismatch {
                expected: computed,
                actual: received,
            });
        }

        Ok(Self {
            message_id,
            acknowledge_id,
            module,
            command_type,
            data: payload,
        })
    }
}

impl Encode for Datagram {
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let data_len: u8 = self
            .data
            .len()
            .try_into()
            .map_err(|_| EncodeError::PayloadTooLong)?;

        let mut encoded = Vec::with_capacity(DATAGRAM_MIN_LEN + self.data.len());
        encoded.extend(self.message_id.to_le_bytes());
        encoded.extend(self.acknowledge_id.to_le_bytes());
        encoded.push(self.module);
        encoded.push(self.command_type);
        encoded.push(data_len);
        encoded.extend_from_slice(&self.data);
        encoded.extend([0u8; 4]);

        let checksum = ROVER_CRC32.checksum(&encoded);
        let tail = encoded.len() - 4;
        encoded[tail..].copy_from_slice(&checksum.to_le_bytes());

        Ok(encoded)
    }
}

/// CRC-32 of a serialized record as if its trailing checksum field were zero.
fn crc_with_zeroed_checksum(raw: &[u8]) -> u32 {
    let mut digest = ROVER_CRC32.digest();
    digest.update(&raw[..raw.len() - 4]);
    digest.update(&[0u8; 4]);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::{cmds, is_nack, modules, nack_of, Datagram, Message, MESSAGE_LEN};
    use crate::{
        decode::DecodeError,
        encode::{Encode, EncodeError},
        frame,
    };

    fn forward(data: u32) -> Message {
        Message {
            message_id: 1,
            acknowledge_id: 0,
            module: modules::MOTOR,
            command_type: cmds::MOTOR_FORWARD,
            data,
        }
    }

    #[test]
    fn round_trip() {
        let messages = [
            forward(255),
            Message {
                message_id: u32::MAX,
                acknowledge_id: u32::MAX,
                module: modules::COMPASS_SENSOR,
                command_type: 0xFF,
                data: u32::MAX,
            },
            Message {
                message_id: 7,
                acknowledge_id: 3,
                module: modules::DISTANCE_SENSOR,
                command_type: cmds::DISTANCE_DATA,
                data: 42,
            },
        ];
        for message in messages {
            let encoded = message.encode().unwrap();
            assert_eq!(encoded.len(), MESSAGE_LEN);
            assert_eq!(Message::decode(&encoded).unwrap(), message);
        }
    }

    #[test]
    fn checksum_sensitivity() {
        let encoded = forward(255).encode().unwrap();
        for byte in 0..encoded.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(matches!(
                    Message::decode(&corrupted),
                    Err(DecodeError::ChecksumMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn length_mismatch() {
        let encoded = forward(0).encode().unwrap();
        assert_eq!(
            Message::decode(&encoded[..MESSAGE_LEN - 1]),
            Err(DecodeError::LengthMismatch {
                expected: MESSAGE_LEN,
                actual: MESSAGE_LEN - 1,
            })
        );
        assert!(matches!(
            Message::decode(&[]),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn end_to_end() {
        let message = forward(255);

        let encoded = message.encode().unwrap();
        let framed = frame::wrap(&encoded);
        let unframed = frame::unwrap(&framed).unwrap();
        assert_eq!(Message::decode(&unframed).unwrap(), message);

        // Corrupting one payload byte fails the checksum, not the decoder
        let mut corrupted = unframed;
        corrupted[12] ^= 0x01;
        assert!(matches!(
            Message::decode(&corrupted),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn datagram_round_trip() {
        let datagram = Datagram {
            message_id: 9,
            acknowledge_id: 0,
            module: modules::ARDUINO,
            command_type: cmds::ARDUINO_START,
            data: vec![0x0C, 0x1B, 0x41],
        };
        let encoded = datagram.encode().unwrap();
        assert_eq!(Datagram::decode(&encoded).unwrap(), datagram);
    }

    #[test]
    fn datagram_length_errors() {
        let datagram = Datagram {
            message_id: 1,
            acknowledge_id: 0,
            module: modules::MOTOR,
            command_type: cmds::MOTOR_STOP,
            data: vec![1, 2, 3, 4],
        };
        let encoded = datagram.encode().unwrap();

        // Truncating the payload disagrees with the declared length
        assert!(matches!(
            Datagram::decode(&encoded[..encoded.len() - 1]),
            Err(DecodeError::LengthMismatch { .. })
        ));

        let oversize = Datagram {
            data: vec![0; 256],
            ..datagram
        };
        assert_eq!(oversize.encode(), Err(EncodeError::PayloadTooLong));
    }

    #[test]
    fn nack_pairing() {
        assert_eq!(nack_of(cmds::MOTOR_FORWARD), cmds::MOTOR_FORWARD_NACK);
        assert_eq!(nack_of(cmds::MOTOR_STOP), cmds::MOTOR_STOP_NACK);
        assert_eq!(nack_of(cmds::ARDUINO_RESTART), cmds::ARDUINO_RESTART_NACK);
        assert!(is_nack(cmds::MOTOR_LEFT_NACK));
        assert!(!is_nack(cmds::DISTANCE_DATA));
    }
}
