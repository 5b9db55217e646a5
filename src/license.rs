//! License validation. Treated as a self-contained concern rather than a
//! stubbed port, since it has no natural seam to inject. AES-128-CBC
//! decrypt of a base64 blob into `CompanyName/Location/ServerUniqID/
//! TotalLicense`, validated against this machine's fingerprint and the
//! enabled machine count.

use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
#[cfg(test)]
use cbc::cipher::BlockEncryptMut;

use crate::error::LicenseError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
#[cfg(test)]
type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// The four `/`-separated fields of a decrypted license blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicensePayload {
    pub company_name: String,
    pub location: String,
    pub server_uniq_id: String,
    pub total_license: i64,
}

/// Zero-pads key/IV material to the 16 bytes AES-128-CBC requires.
/// `LICENSE_SECRET_KEY`/`LICENSE_IV` are expected to be at most 16 bytes;
/// longer input is truncated rather than rejected, since there is no valid
/// longer input to reject.
pub fn pad_key_material(raw: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = raw.as_bytes();
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Decrypts `blob` (base64 of an AES-128-CBC ciphertext, PKCS7-padded)
/// into its four fields.
pub fn decrypt_blob(blob: &str, key: &[u8; 16], iv: &[u8; 16]) -> Result<LicensePayload, LicenseError> {
    let ciphertext = STANDARD.decode(blob)?;
    let decryptor =
        Aes128CbcDec::new_from_slices(key, iv).map_err(|e| LicenseError::Decrypt(e.to_string()))?;
    let plain = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| LicenseError::Decrypt(e.to_string()))?;
    let text = String::from_utf8(plain).map_err(|_| LicenseError::NotUtf8)?;
    parse_payload(&text)
}

/// Encrypts a payload string the same way the license issuer would have.
/// Only used by tests to exercise the decrypt path without a fixture blob
/// checked into the tree.
#[cfg(test)]
pub fn encrypt_blob(plain: &str, key: &[u8; 16], iv: &[u8; 16]) -> String {
    let encryptor = Aes128CbcEnc::new_from_slices(key, iv).expect("16-byte key/iv are always valid");
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
    STANDARD.encode(ciphertext)
}

fn parse_payload(text: &str) -> Result<LicensePayload, LicenseError> {
    let parts: Vec<&str> = text.split('/').collect();
    if parts.len() != 4 {
        return Err(LicenseError::Malformed);
    }
    let total_license: i64 = parts[3].parse().map_err(|_| LicenseError::Malformed)?;
    Ok(LicensePayload {
        company_name: parts[0].to_string(),
        location: parts[1].to_string(),
        server_uniq_id: parts[2].to_string(),
        total_license,
    })
}

/// The payload's `ServerUniqID` must equal this machine's fingerprint
/// hash, and the enabled machine count must not exceed `TotalLicense`.
pub fn validate(
    payload: &LicensePayload,
    fingerprint_hash: &str,
    enabled_machine_count: usize,
) -> Result<(), LicenseError> {
    if payload.server_uniq_id != fingerprint_hash {
        return Err(LicenseError::FingerprintMismatch);
    }
    if enabled_machine_count as i64 > payload.total_license {
        return Err(LicenseError::MachineCountExceeded {
            enabled: enabled_machine_count,
            licensed: payload.total_license,
        });
    }
    Ok(())
}
