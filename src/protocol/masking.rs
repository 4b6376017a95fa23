//! Payload masking.
//!
//! Masking XORs every payload byte with `key[i % 4]`. It is its own inverse,
//! so the same routine masks outgoing and unmasks incoming payloads.
//!
//! [`mask`] splits the buffer into an unaligned head, a word-aligned body
//! XORed one `usize` at a time, and a tail. The result is byte-identical to
//! [`mask_bytewise`] for every alignment and length.

use std::mem::size_of;

const WORD: usize = size_of::<usize>();

/// Buffers shorter than this are masked byte by byte.
const FAST_PATH_MIN_LEN: usize = 2 * WORD;

/// Reference implementation: `buf[i] ^= key[i % 4]`.
#[inline]
pub fn mask_bytewise(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Key as seen by a slice starting `offset` bytes into the payload.
#[inline]
pub fn rotate_key(key: [u8; 4], offset: u64) -> [u8; 4] {
    let mut rotated = key;
    rotated.rotate_left((offset % 4) as usize);
    rotated
}

/// Mask `buf` in place.
pub fn mask(buf: &mut [u8], key: [u8; 4]) {
    if buf.len() < FAST_PATH_MIN_LEN {
        mask_bytewise(buf, key);
        return;
    }

    // SAFETY: every bit pattern is a valid `u8` and a valid `usize`, so
    // reinterpreting the aligned middle of the slice is sound.
    let (head, body, tail) = unsafe { buf.align_to_mut::<usize>() };

    mask_bytewise(head, key);

    // WORD is a multiple of 4, so the body and tail keep the head's rotation.
    let rotated = rotate_key(key, head.len() as u64);
    let word_key = expand_key(rotated);
    for word in body.iter_mut() {
        *word ^= word_key;
    }

    mask_bytewise(tail, rotated);
}

/// Mask `buf`, which starts `offset` bytes into a frame payload.
#[inline]
pub fn mask_at(buf: &mut [u8], key: [u8; 4], offset: u64) {
    mask(buf, rotate_key(key, offset));
}

/// Repeat the key across a machine word in memory order.
#[inline]
fn expand_key(key: [u8; 4]) -> usize {
    let mut bytes = [0u8; WORD];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = key[i & 3];
    }
    usize::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_rfc_example() {
        // RFC 6455 section 5.7: masked "Hello".
        let mut data = *b"Hello";
        mask(&mut data, KEY);
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_matches_bytewise_every_alignment() {
        let mut backing = vec![0u8; 256 + 16];
        for align in 0..16 {
            for len in 0..=200 {
                let source = pattern(len);

                let fast = &mut backing[align..align + len];
                fast.copy_from_slice(&source);
                mask(fast, KEY);

                let mut reference = source.clone();
                mask_bytewise(&mut reference, KEY);

                assert_eq!(
                    &backing[align..align + len],
                    &reference[..],
                    "align {align}, len {len}"
                );
            }
        }
    }

    #[test]
    fn test_self_inverse() {
        let mut backing = vec![0u8; 128 + 8];
        for align in 0..8 {
            for len in 0..=128 {
                let source = pattern(len);
                let buf = &mut backing[align..align + len];
                buf.copy_from_slice(&source);
                mask(buf, KEY);
                mask(buf, KEY);
                assert_eq!(buf, &source[..], "align {align}, len {len}");
            }
        }
    }

    #[test]
    fn test_mask_at_offsets() {
        let source = pattern(97);
        let mut whole = source.clone();
        mask(&mut whole, KEY);

        for split in [0usize, 1, 2, 3, 5, 17, 64, 96, 97] {
            let mut chunked = source.clone();
            let (first, second) = chunked.split_at_mut(split);
            mask_at(first, KEY, 0);
            mask_at(second, KEY, split as u64);
            assert_eq!(chunked, whole, "split {split}");
        }
    }

    #[test]
    fn test_rotate_key() {
        assert_eq!(rotate_key(KEY, 0), KEY);
        assert_eq!(rotate_key(KEY, 1), [0xfa, 0x21, 0x3d, 0x37]);
        assert_eq!(rotate_key(KEY, 4), KEY);
        assert_eq!(rotate_key(KEY, 7), [0x3d, 0x37, 0xfa, 0x21]);
    }

    #[test]
    fn test_zero_key_is_identity() {
        let source = pattern(100);
        let mut buf = source.clone();
        mask(&mut buf, [0; 4]);
        assert_eq!(buf, source);
    }
}
