//! 128-byte Hamming-style ECC, ported from the `mymc`-derived reference
//! implementation: a column-parity byte plus two line-parity bytes,
//! computed over one 128-byte page chunk. A 512-byte page holds four such
//! chunks, each protected independently (§4.1).

/// Returns `true` if `x` has an odd number of set bits.
fn byte_parity(mut x: u8) -> bool {
    x ^= x >> 1;
    x ^= x >> 2;
    x ^= x >> 4;
    x & 1 != 0
}

fn column_parity_mask(x: u8) -> u8 {
    (byte_parity(x & 0x55) as u8)
        | (byte_parity(x & 0x33) as u8) << 1
        | (byte_parity(x & 0x0F) as u8) << 2
        | (byte_parity(x & 0x00) as u8) << 3
        | (byte_parity(x & 0xAA) as u8) << 4
        | (byte_parity(x & 0xCC) as u8) << 5
        | (byte_parity(x & 0xF0) as u8) << 6
}

/// Bytes of ECC covering one 128-byte chunk.
pub const CHUNK_SIZE: usize = 128;
pub const CHUNK_ECC_SIZE: usize = 3;

/// Computes the 3-byte ECC for a 128-byte chunk.
pub fn encode_chunk(data: &[u8; CHUNK_SIZE]) -> [u8; CHUNK_ECC_SIZE] {
    let mut column_parity = 0x77u8;
    let mut line_parity_0 = 0x7Fu8;
    let mut line_parity_1 = 0x7Fu8;

    for (i, &byte) in data.iter().enumerate() {
        column_parity ^= column_parity_mask(byte);
        if byte_parity(byte) {
            line_parity_0 ^= !(i as u8) & 0x7F;
            line_parity_1 ^= i as u8;
        }
    }
    line_parity_0 &= 0x7F;

    [column_parity, line_parity_0, line_parity_1]
}

/// Recomputes the ECC for `data` and compares it against `ecc`. Mismatches
/// are non-fatal (§4.1, §7): the core has no correction algorithm, matching
/// the reference implementation's own `TODO`.
pub fn verify_chunk(ecc: &[u8; CHUNK_ECC_SIZE], data: &[u8; CHUNK_SIZE]) -> bool {
    encode_chunk(data) == *ecc
}

/// Bytes of ECC covering one 512-byte page (4 chunks of 128 bytes each).
pub const PAGE_ECC_SIZE: usize = 12;

/// Computes the 12-byte ECC for a 512-byte page, one 3-byte record per
/// 128-byte quarter.
pub fn encode_page(ecc: &mut [u8; PAGE_ECC_SIZE], data: &[u8]) {
    for (i, chunk) in data.chunks_exact(CHUNK_SIZE).enumerate().take(4) {
        let chunk: &[u8; CHUNK_SIZE] = chunk.try_into().expect("chunks_exact yields CHUNK_SIZE slices");
        ecc[i * CHUNK_ECC_SIZE..i * CHUNK_ECC_SIZE + CHUNK_ECC_SIZE].copy_from_slice(&encode_chunk(chunk));
    }
}

/// Verifies all four quarters of a 512-byte page. Returns `false` if any
/// quarter mismatches.
pub fn verify_page(ecc: &[u8; PAGE_ECC_SIZE], data: &[u8]) -> bool {
    data.chunks_exact(CHUNK_SIZE)
        .enumerate()
        .take(4)
        .all(|(i, chunk)| {
            let chunk: &[u8; CHUNK_SIZE] = chunk.try_into().expect("chunks_exact yields CHUNK_SIZE slices");
            let ecc: &[u8; CHUNK_ECC_SIZE] = ecc[i * CHUNK_ECC_SIZE..i * CHUNK_ECC_SIZE + CHUNK_ECC_SIZE]
                .try_into()
                .expect("page ECC is at least 12 bytes");
            verify_chunk(ecc, chunk)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut data = [0u8; CHUNK_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        let ecc = encode_chunk(&data);
        assert!(verify_chunk(&ecc, &data));
    }

    #[test]
    fn detects_single_bit_flip_in_data() {
        let data = [0xA5u8; CHUNK_SIZE];
        let ecc = encode_chunk(&data);
        let mut flipped = data;
        flipped[42] ^= 0x01;
        assert!(!verify_chunk(&ecc, &flipped));
    }

    #[test]
    fn detects_single_bit_flip_in_ecc() {
        let data = [0x3Cu8; CHUNK_SIZE];
        let mut ecc = encode_chunk(&data);
        ecc[0] ^= 0x01;
        assert!(!verify_chunk(&ecc, &data));
    }

    #[test]
    fn page_round_trips() {
        let mut data = [0u8; 512];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 13) as u8;
        }
        let mut ecc = [0u8; PAGE_ECC_SIZE];
        encode_page(&mut ecc, &data);
        assert!(verify_page(&ecc, &data));

        data[300] ^= 0x10;
        assert!(!verify_page(&ecc, &data));
    }
}
