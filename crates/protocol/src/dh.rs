//! Diffie-Hellman key agreement over the 768-bit Oakley group 1.
//!
//! A fresh [`DhLocalKeys`] must be generated for every connection attempt.
//! The public value travels in the client hello; the shared secret keys the
//! HMAC-SHA1 key derivation in [`crate::handshake`].

use std::fmt;

use rand::RngCore;
use rsa::BigUint;

use crate::error::{ProtocolError, Result};

/// The 768-bit MODP prime from RFC 2409, section 6.1.
pub const DH_PRIME: [u8; 96] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x3a, 0x36, 0x20, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// Group generator.
pub const DH_GENERATOR: u32 = 2;

/// Length of a freshly generated private scalar in bytes.
pub const PRIVATE_KEY_LENGTH: usize = 95;

/// Length of the encoded public value in bytes (the size of the prime).
pub const PUBLIC_KEY_LENGTH: usize = 96;

fn prime() -> BigUint {
    BigUint::from_bytes_be(&DH_PRIME)
}

/// A local Diffie-Hellman keypair.
#[derive(Clone)]
pub struct DhLocalKeys {
    private_key: BigUint,
    public_key: BigUint,
}

impl DhLocalKeys {
    /// Generates a keypair from a fresh random private scalar.
    pub fn random() -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_private_key(&bytes)
    }

    /// Builds a keypair from a big-endian private scalar.
    ///
    /// Used for deterministic test vectors and for the server side of
    /// in-process test fixtures.
    pub fn from_private_key(private_key: &[u8]) -> Self {
        let private_key = BigUint::from_bytes_be(private_key);
        let public_key = BigUint::from(DH_GENERATOR).modpow(&private_key, &prime());
        Self {
            private_key,
            public_key,
        }
    }

    /// Returns `g^x mod p`, big-endian, left-padded to [`PUBLIC_KEY_LENGTH`].
    pub fn public_key(&self) -> Vec<u8> {
        let raw = self.public_key.to_bytes_be();
        let mut out = vec![0u8; PUBLIC_KEY_LENGTH.saturating_sub(raw.len())];
        out.extend_from_slice(&raw);
        out
    }

    /// Computes `remote^x mod p` as unsigned big-endian bytes with leading
    /// zeros trimmed.
    ///
    /// Remote values of 0, 1, `p - 1` or anything not below `p` are rejected
    /// since they force the shared secret into a trivial subgroup.
    pub fn shared_secret(&self, remote_public: &[u8]) -> Result<Vec<u8>> {
        let p = prime();
        let one = BigUint::from(1u32);
        let remote = BigUint::from_bytes_be(remote_public);

        if remote <= one || remote >= &p - &one {
            return Err(ProtocolError::InvalidPublicKey(format!(
                "remote Diffie-Hellman value out of range ({} bytes)",
                remote_public.len()
            )));
        }

        Ok(remote.modpow(&self.private_key, &p).to_bytes_be())
    }
}

impl fmt::Debug for DhLocalKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhLocalKeys")
            .field("public_key", &self.public_key.to_bytes_be().len())
            .finish_non_exhaustive()
    }
}
