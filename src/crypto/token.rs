//! Reader API tokens.
//!
//! A token is shown to the reader once at registration; only a salted
//! PBKDF2-HMAC-SHA256 hash is stored.

use std::{fmt, num::NonZeroU32};

use rand::{Rng, distr::Alphanumeric};
use ring::pbkdf2;

use super::{CryptoResult, Error};

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
const SCHEME: &str = "pbkdf2-sha256";
const DEFAULT_ITERATIONS: u32 = 10_000;
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

/// Returns `len` random alphanumeric characters.
pub fn generate_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Salted hash of an API token.
///
/// Serialized as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedToken {
    iterations: NonZeroU32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl HashedToken {
    /// Hashes `token` with a fresh random salt.
    pub fn new(token: &str) -> CryptoResult<Self> {
        let iterations = NonZeroU32::new(DEFAULT_ITERATIONS)
            .ok_or_else(|| Error::InvalidHash("iteration count must not be zero".into()))?;

        let mut salt = [0u8; SALT_LENGTH];
        rand::rng().fill(&mut salt);

        let mut hash = [0u8; HASH_LENGTH];
        pbkdf2::derive(ALGORITHM, iterations, &salt, token.as_bytes(), &mut hash);

        Ok(Self {
            iterations,
            salt: salt.to_vec(),
            hash: hash.to_vec(),
        })
    }

    /// Parses the stored representation.
    pub fn parse(encoded: &str) -> CryptoResult<Self> {
        let mut parts = encoded.split('$');
        let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(Error::InvalidHash("expected four `$` separated fields".into()));
        };

        if scheme != SCHEME {
            return Err(Error::InvalidHash(format!("unsupported scheme {scheme}")));
        }

        let iterations = iterations
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| Error::InvalidHash(format!("invalid iteration count {iterations}")))?;

        Ok(Self {
            iterations,
            salt: hex::decode(salt)?,
            hash: hex::decode(hash)?,
        })
    }

    /// Checks `token` against this hash in constant time.
    pub fn verify(&self, token: &str) -> bool {
        pbkdf2::verify(
            ALGORITHM,
            self.iterations,
            &self.salt,
            token.as_bytes(),
            &self.hash,
        )
        .is_ok()
    }
}

impl fmt::Display for HashedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}${}${}${}",
            self.iterations,
            hex::encode(&self.salt),
            hex::encode(&self.hash)
        )
    }
}

impl fmt::Debug for HashedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedToken")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}
