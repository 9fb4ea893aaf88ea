//! XOR payload masking (RFC 6455 section 5.3).
//!
//! Masking and unmasking are the same operation, so [`apply_mask`] is used
//! for both directions.

/// XOR `buf` in place with the repeating 4-byte `mask`.
///
/// Word-aligned interior bytes are processed four at a time; the unaligned
/// head and tail fall back to the byte loop.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    // SAFETY: u32 has no invalid bit patterns; align_to_mut only reinterprets.
    let (head, words, tail) = unsafe { buf.align_to_mut::<u32>() };

    xor_bytes(head, mask);

    // The word mask must be rotated to account for the bytes consumed by
    // the unaligned head.
    let shift = (head.len() & 3) as u32 * 8;
    let word_mask = if cfg!(target_endian = "big") {
        u32::from_ne_bytes(mask).rotate_left(shift)
    } else {
        u32::from_ne_bytes(mask).rotate_right(shift)
    };
    for word in words.iter_mut() {
        *word ^= word_mask;
    }

    xor_bytes(tail, word_mask.to_ne_bytes());
}

#[inline(always)]
fn xor_bytes(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_mask(buf: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[i & 3];
        }
    }

    #[test]
    fn matches_reference_at_every_length_and_alignment() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let data: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();

        for len in 0..data.len() {
            for offset in 0..4.min(len + 1) {
                let mut expected = data[..len].to_vec();
                reference_mask(&mut expected[offset..], mask);

                let mut actual = data[..len].to_vec();
                apply_mask(&mut actual[offset..], mask);

                assert_eq!(expected, actual, "len={len} offset={offset}");
            }
        }
    }

    #[test]
    fn double_mask_is_identity() {
        let mask = [0xaa, 0xbb, 0xcc, 0xdd];
        let original = b"masking twice restores the original payload".to_vec();
        let mut buf = original.clone();
        apply_mask(&mut buf, mask);
        assert_ne!(buf, original);
        apply_mask(&mut buf, mask);
        assert_eq!(buf, original);
    }

    #[test]
    fn zero_mask_is_noop() {
        let mut buf = b"unchanged".to_vec();
        apply_mask(&mut buf, [0; 4]);
        assert_eq!(&buf, b"unchanged");
    }
}
