//! Names packed into integer slots by the manual-instrumentation API.
//!
//! The API copies a nul-terminated name into eight `u64` slots, eight bytes
//! per slot in little-endian order, and spills longer names into additional
//! slots. Decoding concatenates the bytes and stops at the first nul.

use crate::events::EncodedName;

impl EncodedName {
    /// Pack `name` the way the instrumentation API does.
    pub fn encode(name: &str) -> Self {
        let mut words = name
            .as_bytes()
            .chunks(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes[..chunk.len()].copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect::<Vec<_>>()
            .into_iter();

        let mut slots = [0u64; 8];
        for slot in slots.iter_mut() {
            match words.next() {
                Some(word) => *slot = word,
                None => break,
            }
        }
        Self {
            slots,
            additional: words.collect(),
        }
    }

    /// Reassemble the name. Invalid UTF-8 is replaced rather than rejected.
    pub fn decode(&self) -> String {
        let mut bytes = Vec::with_capacity((self.slots.len() + self.additional.len()) * 8);
        for word in self.slots.iter().chain(self.additional.iter()) {
            for byte in word.to_le_bytes() {
                if byte == 0 {
                    return String::from_utf8_lossy(&bytes).into_owned();
                }
                bytes.push(byte);
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
