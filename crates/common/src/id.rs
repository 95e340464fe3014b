//! ID and invite code generation.

use rand::RngCore;
use uuid::Uuid;

/// Number of random bytes in an invite code.
const INVITE_CODE_BYTES: usize = 16;

/// ID generator for groups, rooms and bans.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new random UUID v4 in its hyphenated lowercase form.
    #[must_use]
    pub fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Generate an unguessable invite code.
    ///
    /// Codes are hex strings of 128 random bits from the thread-local CSPRNG.
    #[must_use]
    pub fn generate_invite_code(&self) -> String {
        let mut bytes = [0u8; INVITE_CODE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Whether `id` is a UUID in its canonical hyphenated form.
#[must_use]
pub fn is_valid_uuid(id: &str) -> bool {
    id.len() == 36 && Uuid::try_parse(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 36);
        assert!(is_valid_uuid(&id1));
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generate_invite_code() {
        let id_gen = IdGenerator::new();
        let code = id_gen.generate_invite_code();

        assert_eq!(code.len(), 32);
        assert!(code.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(code, id_gen.generate_invite_code());
    }

    #[test]
    fn test_uuid_shape() {
        assert!(is_valid_uuid("7a7a9b0c-6e0f-4c8b-9a57-2f1f7b6f2f10"));
        assert!(!is_valid_uuid("7a7a9b0c6e0f4c8b9a572f1f7b6f2f10"));
        assert!(!is_valid_uuid("kittens"));
        assert!(!is_valid_uuid(""));
    }
}
