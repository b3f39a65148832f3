//! Fresh identifier generation.
//!
//! All random identifiers (account ids, transaction ids, member codes) come
//! from one [`IdGenerator`] so tests can swap in a deterministic source.

use rand::{rngs::OsRng, Rng, RngCore};

const LOYALTY_CODE_PREFIX: &str = "LOY";
const LOYALTY_CODE_LEN: usize = 8;
const LOYALTY_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub trait IdGenerator: Send + Sync {
    /// Opaque unique account id.
    fn account_id(&self) -> String;

    /// Opaque unique transaction id.
    fn transaction_id(&self) -> String;

    /// Member code: `LOY` followed by 8 characters from `[A-Z0-9]`.
    fn loyalty_code(&self) -> String;
}

/// Generator backed by the operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    fn hex_id() -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn account_id(&self) -> String {
        Self::hex_id()
    }

    fn transaction_id(&self) -> String {
        Self::hex_id()
    }

    fn loyalty_code(&self) -> String {
        let suffix: String = (0..LOYALTY_CODE_LEN)
            .map(|_| LOYALTY_CODE_CHARSET[OsRng.gen_range(0..LOYALTY_CODE_CHARSET.len())] as char)
            .collect();
        format!("{}{}", LOYALTY_CODE_PREFIX, suffix)
    }
}
