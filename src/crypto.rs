mod errors;
pub mod kdf;
pub mod token;

pub use errors::Error;
pub use kdf::{DEFAULT_NTAG424_KEY, MASTER_KEY_SLOT, Ntag424Key, derive_ntag424_key};
pub use token::{HashedToken, generate_token};

pub(crate) use errors::CryptoResult;
