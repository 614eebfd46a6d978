use crc::Crc;

/// The rover firmware checksums every message with the standard zlib CRC32
/// (CRC-32/ISO-HDLC). Both ends compute it over the full serialized record
/// with the checksum field zeroed.
pub const ROVER_CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
