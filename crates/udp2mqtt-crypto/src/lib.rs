//! `udp2mqtt` gateway key derivation
//!
//! Gateways accept write commands only when they carry a key derived from the
//! operator-configured gateway password and the gateway's latest token.
//!
//! ## Crypto primitives
//!
//! - **Cipher**: AES-128 in CBC mode, no padding, one block
//! - **IV**: fixed 16-byte vector shared by every gateway
//! - **Output**: the ciphertext block, lowercase hex

pub mod error;
pub mod secure_key;

pub use error::CryptoError;
pub use secure_key::{BLOCK_SIZE, GATEWAY_IV, derive_secure_key, derive_secure_key_with_iv};
