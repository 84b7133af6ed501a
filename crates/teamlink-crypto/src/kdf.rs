use hkdf::Hkdf;
use sha2::Sha256;

use crate::CryptoError;

/// HKDF-SHA256 expanding `ikm` into a 32 byte key bound to `info`.
pub(crate) fn derive_key(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm).map_err(|_| CryptoError::KeyDerivation)?;
    Ok(okm)
}
