//! CRC-16/Modbus.
//!
//! Reflected polynomial 0xA001, initial value 0xFFFF. On the wire the low
//! byte is sent first.

/// Compute the CRC-16/Modbus checksum of `data`.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the checksum of `frame` in wire order (low byte first).
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.push((crc & 0xFF) as u8);
    frame.push((crc >> 8) as u8);
}

/// Verify that `frame` ends with a valid checksum over the preceding bytes.
pub fn check_crc(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let crc = crc16_modbus(body);
    tail[0] == (crc & 0xFF) as u8 && tail[1] == (crc >> 8) as u8
}
