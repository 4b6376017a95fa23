//! Incremental UTF-8 validation.
//!
//! Text payloads arrive in chunks that may split a multi-byte sequence.
//! [`Utf8Validator`] carries up to three trailing bytes of an unfinished
//! sequence between calls to [`Utf8Validator::feed`].

/// Rejected input: an invalid byte sequence was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Rejected;

/// Streaming validator state, persisted across chunks and fragments.
#[derive(Debug, Default, Clone)]
pub struct Utf8Validator {
    pending: [u8; 4],
    pending_len: usize,
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next chunk of a text message.
    pub fn feed(&mut self, mut input: &[u8]) -> Result<(), Utf8Rejected> {
        if self.pending_len > 0 {
            let needed = sequence_len(self.pending[0]).saturating_sub(self.pending_len);
            let take = needed.min(input.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&input[..take]);
            self.pending_len += take;
            input = &input[take..];

            match std::str::from_utf8(&self.pending[..self.pending_len]) {
                Ok(_) => self.pending_len = 0,
                Err(e) if e.error_len().is_none() => return Ok(()),
                Err(_) => return Err(Utf8Rejected),
            }
        }

        match std::str::from_utf8(input) {
            Ok(_) => Ok(()),
            Err(e) => match e.error_len() {
                Some(_) => Err(Utf8Rejected),
                None => {
                    let rest = &input[e.valid_up_to()..];
                    self.pending[..rest.len()].copy_from_slice(rest);
                    self.pending_len = rest.len();
                    Ok(())
                }
            },
        }
    }

    /// True when no multi-byte sequence is left unfinished.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.pending_len == 0
    }

    pub fn reset(&mut self) {
        self.pending_len = 0;
    }
}

/// Length of the sequence introduced by a lead byte the decoder already accepted.
fn sequence_len(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii() {
        let mut v = Utf8Validator::new();
        assert!(v.feed(b"Hello").is_ok());
        assert!(v.is_complete());
    }

    #[test]
    fn test_split_sequences_every_position() {
        let text = "κόσμε €uro 😀 end".as_bytes();
        for split in 0..=text.len() {
            let mut v = Utf8Validator::new();
            assert!(v.feed(&text[..split]).is_ok(), "split {split}");
            assert!(v.feed(&text[split..]).is_ok(), "split {split}");
            assert!(v.is_complete(), "split {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "😀€κ".as_bytes();
        let mut v = Utf8Validator::new();
        for byte in text {
            assert!(v.feed(std::slice::from_ref(byte)).is_ok());
        }
        assert!(v.is_complete());
    }

    #[test]
    fn test_incomplete_at_end() {
        let mut v = Utf8Validator::new();
        assert!(v.feed(&[0xF0, 0x9F, 0x98]).is_ok());
        assert!(!v.is_complete());
    }

    #[test]
    fn test_invalid_rejected() {
        let mut v = Utf8Validator::new();
        assert_eq!(v.feed(&[0xFF]), Err(Utf8Rejected));

        let mut v = Utf8Validator::new();
        assert_eq!(v.feed(&[0xC0, 0x80]), Err(Utf8Rejected));

        // Surrogate half.
        let mut v = Utf8Validator::new();
        assert_eq!(v.feed(&[0xED, 0xA0, 0x80]), Err(Utf8Rejected));
    }

    #[test]
    fn test_invalid_continuation_across_chunks() {
        let mut v = Utf8Validator::new();
        assert!(v.feed(&[0xE2, 0x82]).is_ok());
        assert_eq!(v.feed(&[0x41]), Err(Utf8Rejected));
    }

    #[test]
    fn test_reset() {
        let mut v = Utf8Validator::new();
        v.feed(&[0xE2]).unwrap();
        assert!(!v.is_complete());
        v.reset();
        assert!(v.is_complete());
    }
}
