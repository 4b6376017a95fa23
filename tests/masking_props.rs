//! Property tests for masking, UTF-8 validation and header encoding.

use proptest::prelude::*;

use ws_engine::protocol::{
    mask, mask_at, mask_bytewise, FrameHeader, Opcode, Utf8Validator, MAX_HEADER_SIZE,
};

fn arb_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Continuation),
        Just(Opcode::Text),
        Just(Opcode::Binary),
        Just(Opcode::Close),
        Just(Opcode::Ping),
        Just(Opcode::Pong),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The word-wise mask matches the byte-wise one at every alignment.
    #[test]
    fn mask_matches_bytewise(
        data in proptest::collection::vec(any::<u8>(), 0..600),
        key in any::<[u8; 4]>(),
        skip in 0usize..8,
    ) {
        let skip = skip.min(data.len());
        let mut fast = data.clone();
        let mut slow = data.clone();
        mask(&mut fast[skip..], key);
        mask_bytewise(&mut slow[skip..], key);
        prop_assert_eq!(fast, slow);
    }

    /// Masking a payload in pieces gives the same bytes as masking it whole.
    #[test]
    fn mask_at_split_anywhere(
        data in proptest::collection::vec(any::<u8>(), 1..300),
        key in any::<[u8; 4]>(),
        split in any::<prop::sample::Index>(),
    ) {
        let at = split.index(data.len());
        let mut whole = data.clone();
        mask(&mut whole, key);

        let mut pieces = data.clone();
        let (head, tail) = pieces.split_at_mut(at);
        mask_at(head, key, 0);
        mask_at(tail, key, at as u64);
        prop_assert_eq!(whole, pieces);
    }

    /// Valid UTF-8 is accepted however it is split.
    #[test]
    fn utf8_accepts_any_split(text in ".{0,40}", split in any::<prop::sample::Index>()) {
        let bytes = text.as_bytes();
        let at = if bytes.is_empty() { 0 } else { split.index(bytes.len() + 1) };
        let mut validator = Utf8Validator::new();
        prop_assert!(validator.feed(&bytes[..at]).is_ok());
        prop_assert!(validator.feed(&bytes[at..]).is_ok());
        prop_assert!(validator.is_complete());
    }

    /// The validator agrees with the standard library on arbitrary bytes.
    #[test]
    fn utf8_agrees_with_std(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut validator = Utf8Validator::new();
        let accepted = validator.feed(&bytes).is_ok() && validator.is_complete();
        prop_assert_eq!(accepted, std::str::from_utf8(&bytes).is_ok());
    }

    /// Encoded headers decode to the same fields with the minimal length form.
    #[test]
    fn header_encoding_is_minimal(
        fin in any::<bool>(),
        opcode in arb_opcode(),
        payload_len in prop_oneof![0u64..=125, 126u64..=65535, 65536u64..(1 << 63)],
        mask_key in proptest::option::of(any::<[u8; 4]>()),
    ) {
        let header = FrameHeader::new(fin, opcode, payload_len, mask_key);
        let (buf, len) = header.encode();
        prop_assert!(len <= MAX_HEADER_SIZE);
        prop_assert_eq!(len, header.encoded_len());

        let (decoded, used) = FrameHeader::decode(&buf[..len]).unwrap();
        prop_assert_eq!(used, len);
        prop_assert_eq!(decoded, header);

        let expected = 2
            + match payload_len {
                0..=125 => 0,
                126..=65535 => 2,
                _ => 8,
            }
            + if mask_key.is_some() { 4 } else { 0 };
        prop_assert_eq!(len, expected);
    }
}
