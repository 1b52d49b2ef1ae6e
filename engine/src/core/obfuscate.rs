//! Payload obfuscation.
//!
//! A plain repeating-key XOR. This is explicitly not confidentiality — it
//! exists only to keep a casual packet dump from reading as plain text.
//! The transform is its own inverse, so the same function is used on send
//! and on receive.

/// Applies the repeating-key XOR transform to `data` in place.
pub fn xor_transform(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}
