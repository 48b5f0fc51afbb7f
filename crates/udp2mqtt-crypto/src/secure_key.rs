//! Secure-key derivation for gateway write commands.
//!
//! The gateway password is used directly as an AES-128 key and the 16-byte
//! token the gateway last reported is encrypted as a single CBC block under
//! a fixed IV. The hex-encoded ciphertext is the key a write command must
//! carry.

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};

use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// AES block size; also the required password and token length.
pub const BLOCK_SIZE: usize = 16;

/// Initialization vector baked into the gateway firmware.
pub const GATEWAY_IV: [u8; BLOCK_SIZE] = [
    0x17, 0x99, 0x6d, 0x09, 0x3d, 0x28, 0xdd, 0xb3, 0xba, 0x69, 0x5a, 0x2e, 0x6f, 0x58, 0x56, 0x2e,
];

/// Derive a gateway's secure key using the firmware IV.
pub fn derive_secure_key(password: &[u8], token: &[u8]) -> Result<String, CryptoError> {
    derive_secure_key_with_iv(password, token, &GATEWAY_IV)
}

/// Derive a secure key with an explicit IV.
///
/// `password` must be exactly one AES-128 key and `token` exactly one block;
/// nothing is padded or truncated.
pub fn derive_secure_key_with_iv(
    password: &[u8],
    token: &[u8],
    iv: &[u8; BLOCK_SIZE],
) -> Result<String, CryptoError> {
    if password.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: BLOCK_SIZE,
            actual: password.len(),
        });
    }
    if token.len() != BLOCK_SIZE {
        return Err(CryptoError::InvalidTokenLength {
            expected: BLOCK_SIZE,
            actual: token.len(),
        });
    }

    let encryptor = Aes128CbcEnc::new_from_slices(password, iv).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: BLOCK_SIZE,
            actual: password.len(),
        }
    })?;

    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(token);
    let ciphertext = encryptor
        .encrypt_padded_mut::<NoPadding>(&mut block, BLOCK_SIZE)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(hex::encode(ciphertext))
}
