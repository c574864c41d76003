/// XORs `buf` with the repeating four byte `mask`.
///
/// Masking and unmasking are the same operation.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ mask_u32;
        word.copy_from_slice(&value.to_ne_bytes());
    }
    for (byte, key) in words.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_matches_bytewise_xor() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let unmasked = [
            0xf3, 0x00, 0x01, 0x02, 0x03, 0x80, 0x81, 0x82, 0xff, 0xfe, 0x00, 0x17, 0x74, 0xf9,
            0x12, 0x03,
        ];

        for data_len in 0..=unmasked.len() {
            let mut masked = unmasked[..data_len].to_vec();
            apply_mask(&mut masked, mask);

            for (i, &byte) in masked.iter().enumerate() {
                assert_eq!(byte, unmasked[i] ^ mask[i % 4], "mismatch at index {i}");
            }
        }
    }

    #[test]
    fn test_mask_unmask_identity() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let original = b"Hello, World! This is a test message with various lengths.";

        let mut data = original.to_vec();
        apply_mask(&mut data, mask);
        assert_ne!(&data[..], &original[..]);

        apply_mask(&mut data, mask);
        assert_eq!(&data[..], &original[..]);
    }

    #[test]
    fn test_mask_short_buffers() {
        let mask = [0x12, 0x34, 0x56, 0x78];

        let mut empty: Vec<u8> = vec![];
        apply_mask(&mut empty, mask);
        assert!(empty.is_empty());

        let mut three = vec![0xAB, 0xCD, 0xEF];
        apply_mask(&mut three, mask);
        assert_eq!(three, vec![0xAB ^ 0x12, 0xCD ^ 0x34, 0xEF ^ 0x56]);
    }

    #[test]
    fn test_mask_unaligned_slices() {
        let mask = [0x01, 0x02, 0x03, 0x04];
        let buffer: Vec<u8> = (0..37).collect();

        for offset in 0..4 {
            let mut data = buffer.clone();
            apply_mask(&mut data[offset..], mask);
            for (i, &byte) in data[offset..].iter().enumerate() {
                assert_eq!(byte, buffer[offset + i] ^ mask[i % 4]);
            }
        }
    }
}
