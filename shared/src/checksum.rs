//! Rolling two-accumulator checksum trailing every frame

/// Both accumulators start from this value
pub const CHECKSUM_SEED: u8 = 0x7E;

/// Computes the frame checksum over `bytes`
///
/// Two 8-bit accumulators walk the buffer: the first sums the bytes, the
/// second sums the running values of the first. The result folds both into
/// 16 bits as `val2 - ((val1 + val2) << 8)`. Because the low byte carries
/// `val2` and the high byte carries the negated sum, any single-bit change
/// in the covered bytes changes `val1` and therefore the checksum.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut val1 = CHECKSUM_SEED;
    let mut val2 = CHECKSUM_SEED;

    for &byte in bytes {
        val1 = val1.wrapping_add(byte);
        val2 = val2.wrapping_add(val1);
    }

    let val1 = u32::from(val1);
    let val2 = u32::from(val2);
    val2.wrapping_sub((val1 + val2) << 8) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_of_empty_input_uses_seed() {
        // val1 = val2 = 0x7E: 0x7E - (0xFC << 8) = 0x7E - 0xFC00
        assert_eq!(checksum(&[]), 0x7Eu32.wrapping_sub(0xFC00) as u16);
    }

    #[test]
    fn test_checksum_known_vector() {
        // val1: 0x7E+1 = 0x7F, +2 = 0x81
        // val2: 0x7E+0x7F = 0xFD, +0x81 = 0x17E -> 0x7E
        let expected = 0x7Eu32.wrapping_sub((0x81 + 0x7E) << 8) as u16;
        assert_eq!(checksum(&[1, 2]), expected);
    }

    #[test]
    fn test_checksum_is_order_sensitive() {
        assert_ne!(checksum(&[1, 2, 3]), checksum(&[3, 2, 1]));
    }

    #[test]
    fn test_checksum_detects_every_single_bit_flip() {
        let data: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();
        let original = checksum(&data);

        for index in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[index] ^= 1 << bit;
                assert_ne!(
                    checksum(&corrupted),
                    original,
                    "flip of bit {} in byte {} went unnoticed",
                    bit,
                    index
                );
            }
        }
    }
}
