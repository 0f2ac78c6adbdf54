//! CRC-8 used by both frame checksums.
//!
//! Polynomial x^8 + x^2 + x + 1 (0x07), initial value 0, MSB first, no
//! reflection and no final xor. Both endpoints must compute it identically.

/// Generator polynomial without the implicit x^8 term.
pub const POLY: u8 = 0x07;

const TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-8 over exactly `data`.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| TABLE[(crc ^ byte) as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit-serial form working on a 16-bit register with the polynomial
    /// aligned to bit 15.
    fn crc8_shift_register(data: &[u8]) -> u8 {
        let mut crc: u32 = 0;
        for &byte in data {
            crc ^= u32::from(byte) << 8;
            for _ in 0..8 {
                if crc & 0x8000 != 0 {
                    crc ^= 0x1070 << 3;
                }
                crc <<= 1;
            }
        }
        (crc >> 8) as u8
    }

    #[test]
    fn check_value() {
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn known_spans() {
        assert_eq!(crc8(&[0xA5, 0x04, 0x00]), 0xDC);
        assert_eq!(crc8(&[0x01, 0x02, 0x03, 0x04]), 0xE3);
        assert_eq!(crc8(&[0xA5, 0x00, 0x00]), 0x88);
    }

    #[test]
    fn table_matches_shift_register() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i.wrapping_mul(131) ^ (i >> 3)) as u8).collect();
        for end in [0, 1, 2, 3, 7, 64, 255, 1024] {
            assert_eq!(crc8(&data[..end]), crc8_shift_register(&data[..end]), "len {end}");
        }
    }

    #[test]
    fn single_bit_errors_always_change_crc() {
        let data = *b"spinet";
        let reference = crc8(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(crc8(&corrupted), reference, "byte {byte} bit {bit}");
            }
        }
    }
}
