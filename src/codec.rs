//! Encryption/decryption using PBKDF2 + AES-256-GCM
//!
//! This module implements passphrase-based encryption using:
//! - PBKDF2-HMAC-SHA256 for key derivation from passphrase
//! - AES-256-GCM for authenticated encryption, with no associated data
//!
//! The output is an [`EncryptedPackage`] carrying:
//! - salt: 16 bytes
//! - iv: 12 bytes
//! - ct: ciphertext followed by the 16-byte GCM tag
//!
//! Nothing here logs or touches the filesystem.

use crate::error::{BitblockError, ErrorCategory, ErrorKind, Result};
use crate::iterations::{self, Advisory, Clamped};
use crate::package::{self, ALGORITHM, EncryptedPackage, VERSION};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::Hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of nonce in bytes
pub const IV_LEN: usize = 12;

/// Length of the GCM authentication tag appended to the ciphertext
pub const TAG_LEN: usize = 16;

/// Length of derived key in bytes
const KEY_LEN: usize = 32;

/// Message for every authentication failure, whatever the cause.
const DECRYPTION_FAILED: &str = "decryption failed: wrong passphrase or corrupted data";

/// Result of a successful decryption.
#[derive(Debug)]
pub struct Decrypted {
    /// The recovered plaintext, wiped from memory on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Set if the package's iteration count had to be capped.
    pub advisory: Option<Advisory>,
}

/// Derive a 32-byte key from a passphrase and salt using PBKDF2-HMAC-SHA256
fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase, salt, iterations, &mut *key).map_err(|e| {
        BitblockError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("PBKDF2 key derivation failed: {}", e),
        )
    })?;
    Ok(key)
}

fn cipher_for(key: &[u8; KEY_LEN]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|e| {
        BitblockError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::Cipher,
            format!("failed to initialize AES-GCM: {}", e),
        )
    })
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        BitblockError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Cipher,
            "system random number generator unavailable",
            e,
        )
    })
}

/// Encrypt plaintext with a passphrase using random salt and nonce
///
/// `iterations` must already have been through [`iterations::resolve_input`]
/// or otherwise lie within `[MIN_ITERATIONS, MAX_ITERATIONS]`.
pub fn encrypt(plaintext: &[u8], passphrase: &[u8], iterations: u32) -> Result<EncryptedPackage> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;

    let mut iv = [0u8; IV_LEN];
    fill_random(&mut iv)?;

    encrypt_deterministic(plaintext, passphrase, iterations, &salt, &iv)
}

/// Encrypt plaintext with a passphrase using provided salt and nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates random salt/nonce.
pub fn encrypt_deterministic(
    plaintext: &[u8],
    passphrase: &[u8],
    iterations: u32,
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
) -> Result<EncryptedPackage> {
    if passphrase.is_empty() {
        return Err(BitblockError::invalid_input("Enter a passphrase."));
    }
    if !iterations::in_range(iterations) {
        return Err(BitblockError::invalid_input(format!(
            "iteration count {} outside of {}..={}",
            iterations,
            iterations::MIN_ITERATIONS,
            iterations::MAX_ITERATIONS
        )));
    }

    let key = derive_key(passphrase, salt, iterations)?;
    let cipher = cipher_for(&key)?;

    let ct = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| {
            BitblockError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::Cipher,
                format!("encryption failed: {}", e),
            )
        })?;

    Ok(EncryptedPackage {
        filename: None,
        v: VERSION,
        alg: ALGORITHM.to_string(),
        iters: u64::from(iterations),
        salt: package::encode_field(salt),
        iv: package::encode_field(iv),
        ct: package::encode_field(&ct),
    })
}

/// Check a package's `alg`, `v` and `iters` and settle the iteration count.
///
/// These are the first checks [`decrypt`] runs, in the same order. Calling
/// this first lets a caller surface the capping advisory even when
/// decryption then fails.
pub fn check_header(pkg: &EncryptedPackage) -> Result<Clamped> {
    if pkg.alg != ALGORITHM {
        return Err(BitblockError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedAlgorithm,
            format!("unsupported package algorithm: {:?}", pkg.alg),
        ));
    }

    if pkg.v != VERSION {
        return Err(BitblockError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedVersion,
            format!(
                "package format version {} is not supported (expected {})",
                pkg.v, VERSION
            ),
        ));
    }

    if pkg.iters == 0 {
        return Err(BitblockError::with_kind(
            ErrorCategory::User,
            ErrorKind::MalformedPackage,
            "package iteration count must be positive",
        ));
    }
    Ok(iterations::cap(pkg.iters))
}

/// Decrypt a package with a passphrase
///
/// Wrong passphrase, tampering and corruption all surface as the same
/// [`ErrorKind::DecryptionFailed`] error with the same message.
pub fn decrypt(pkg: &EncryptedPackage, passphrase: &[u8]) -> Result<Decrypted> {
    let clamped = check_header(pkg)?;

    let salt: [u8; SALT_LEN] = package::decode_fixed("salt", &pkg.salt)?;
    let iv: [u8; IV_LEN] = package::decode_fixed("iv", &pkg.iv)?;
    let ct = package::decode_field("ct", &pkg.ct)?;

    // Too short to even hold a tag; no key can authenticate it.
    if ct.len() < TAG_LEN {
        return Err(decryption_failed());
    }

    let key = derive_key(passphrase, &salt, clamped.iterations)?;
    let cipher = cipher_for(&key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ct.as_slice())
        .map_err(|_| decryption_failed())?;

    Ok(Decrypted {
        plaintext: Zeroizing::new(plaintext),
        advisory: clamped.advisory,
    })
}

fn decryption_failed() -> BitblockError {
    BitblockError::with_kind(
        ErrorCategory::User,
        ErrorKind::DecryptionFailed,
        DECRYPTION_FAILED,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterations::{MAX_ITERATIONS, MIN_ITERATIONS};

    const ITERS: u32 = MIN_ITERATIONS;

    fn roundtrip(plaintext: &[u8], passphrase: &[u8]) -> Vec<u8> {
        let pkg = encrypt(plaintext, passphrase, ITERS).unwrap();
        let decrypted = decrypt(&pkg, passphrase).unwrap();
        assert_eq!(decrypted.advisory, None);
        decrypted.plaintext.to_vec()
    }

    fn assert_decryption_failed(result: Result<Decrypted>) {
        let err = result.expect_err("expected decryption failure");
        assert_eq!(err.kind, Some(ErrorKind::DecryptionFailed));
        assert_eq!(err.to_string(), DECRYPTION_FAILED);
    }

    /// Flip one bit of a base64 field in place.
    fn flip_bit(field: &mut String, byte: usize, bit: u8) {
        let mut raw = package::decode_field("test", field).unwrap();
        raw[byte] ^= 1 << bit;
        *field = package::encode_field(&raw);
    }

    #[test]
    fn test_hello_roundtrip() {
        let pkg = encrypt(b"hello", b"correct horse", 10_000).unwrap();
        let decrypted = decrypt(&pkg, b"correct horse").unwrap();
        assert_eq!(String::from_utf8(decrypted.plaintext.to_vec()).unwrap(), "hello");

        assert_decryption_failed(decrypt(&pkg, b"wrong"));
    }

    #[test]
    fn test_empty_plaintext() {
        assert_eq!(roundtrip(b"", b"test"), b"");
    }

    #[test]
    fn test_all_byte_values() {
        let plaintext: Vec<u8> = (0..=255).collect();
        assert_eq!(roundtrip(&plaintext, b"test"), plaintext);
    }

    #[test]
    fn test_large_plaintext() {
        let plaintext = vec![0x42u8; 128 * 1024]; // 128KB
        assert_eq!(roundtrip(&plaintext, b"test"), plaintext);
    }

    #[test]
    fn test_single_byte_and_non_utf8_passphrases() {
        assert_eq!(roundtrip(b"payload", b"x"), b"payload");
        assert_eq!(roundtrip(b"payload", &[0xff, 0xfe, 0x00]), b"payload");
        assert_eq!(roundtrip(b"payload", "pässwörd 🔑".as_bytes()), b"payload");
    }

    #[test]
    fn test_package_shape() {
        let pkg = encrypt(b"hello", b"test", ITERS).unwrap();
        assert_eq!(pkg.v, 1);
        assert_eq!(pkg.alg, "AES-GCM");
        assert_eq!(pkg.iters, u64::from(ITERS));
        assert_eq!(pkg.filename, None);
        assert_eq!(package::decode_field("salt", &pkg.salt).unwrap().len(), SALT_LEN);
        assert_eq!(package::decode_field("iv", &pkg.iv).unwrap().len(), IV_LEN);
        assert_eq!(package::decode_field("ct", &pkg.ct).unwrap().len(), 5 + TAG_LEN);
    }

    #[test]
    fn test_encryption_is_randomized() {
        let pkg1 = encrypt(b"same input", b"same pass", ITERS).unwrap();
        let pkg2 = encrypt(b"same input", b"same pass", ITERS).unwrap();
        assert_ne!(pkg1.salt, pkg2.salt);
        assert_ne!(pkg1.iv, pkg2.iv);
        assert_ne!(pkg1.ct, pkg2.ct);
    }

    #[test]
    fn test_deterministic_encryption() {
        let salt = [1u8; SALT_LEN];
        let iv = [2u8; IV_LEN];

        let pkg1 = encrypt_deterministic(b"hello world", b"test", ITERS, &salt, &iv).unwrap();
        let pkg2 = encrypt_deterministic(b"hello world", b"test", ITERS, &salt, &iv).unwrap();
        assert_eq!(pkg1, pkg2);

        let pt = decrypt(&pkg1, b"test").unwrap();
        assert_eq!(&pt.plaintext[..], b"hello world");
    }

    #[test]
    fn test_known_answer() {
        // Produced independently with PBKDF2-HMAC-SHA256 and AES-256-GCM
        // from Python's hashlib and cryptography packages.
        let pkg = encrypt_deterministic(
            b"test payload",
            b"test",
            10_000,
            &[0x01; SALT_LEN],
            &[0x02; IV_LEN],
        )
        .unwrap();

        assert_eq!(pkg.salt, "AQEBAQEBAQEBAQEBAQEBAQ==");
        assert_eq!(pkg.iv, "AgICAgICAgICAgIC");
        assert_eq!(pkg.ct, "c/zHU38zoswMdRWnAhjt4l+SYT6uWrGgXUOaBQ==");

        let decrypted = decrypt(&pkg, b"test").unwrap();
        assert_eq!(&decrypted.plaintext[..], b"test payload");
    }

    #[test]
    fn test_wrong_passphrase() {
        let pkg = encrypt(b"secret data", b"correct", ITERS).unwrap();
        assert_decryption_failed(decrypt(&pkg, b"wrong"));
        assert_decryption_failed(decrypt(&pkg, b"correct "));
        assert_decryption_failed(decrypt(&pkg, b""));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let pkg = encrypt(b"secret data", b"test", ITERS).unwrap();
        let ct_len = package::decode_field("ct", &pkg.ct).unwrap().len();

        // First byte, a middle byte, and the last tag byte.
        for byte in [0, ct_len / 2, ct_len - 1] {
            let mut tampered = pkg.clone();
            flip_bit(&mut tampered.ct, byte, 3);
            assert_decryption_failed(decrypt(&tampered, b"test"));
        }
    }

    #[test]
    fn test_tampered_salt_and_iv() {
        let pkg = encrypt(b"secret data", b"test", ITERS).unwrap();

        let mut tampered = pkg.clone();
        flip_bit(&mut tampered.salt, 0, 0);
        assert_decryption_failed(decrypt(&tampered, b"test"));

        let mut tampered = pkg.clone();
        flip_bit(&mut tampered.iv, IV_LEN - 1, 7);
        assert_decryption_failed(decrypt(&tampered, b"test"));
    }

    #[test]
    fn test_tampered_iterations() {
        let mut pkg = encrypt(b"secret data", b"test", ITERS).unwrap();
        pkg.iters += 1;
        assert_decryption_failed(decrypt(&pkg, b"test"));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let mut pkg = encrypt(b"secret data", b"test", ITERS).unwrap();
        let mut ct = package::decode_field("ct", &pkg.ct).unwrap();
        ct.truncate(ct.len() - 1);
        pkg.ct = package::encode_field(&ct);
        assert_decryption_failed(decrypt(&pkg, b"test"));

        pkg.ct = package::encode_field(&ct[..TAG_LEN - 1]);
        assert_decryption_failed(decrypt(&pkg, b"test"));
    }

    #[test]
    fn test_corrupted_package_fails_for_any_passphrase() {
        let pkg = EncryptedPackage {
            filename: None,
            v: 1,
            alg: "AES-GCM".to_string(),
            iters: 1000,
            salt: package::encode_field(&[0x5a; SALT_LEN]),
            iv: package::encode_field(&[0xa5; IV_LEN]),
            ct: package::encode_field(b"this is not a real ciphertext"),
        };
        let passphrases: [&[u8]; 4] = [b"a", b"correct horse", b"wrong", b""];
        for pass in passphrases {
            assert_decryption_failed(decrypt(&pkg, pass));
        }
    }

    #[test]
    fn test_unsupported_algorithm_checked_first() {
        let mut pkg = encrypt(b"hello", b"test", ITERS).unwrap();
        pkg.alg = "AES-CBC".to_string();
        // Garbage elsewhere must not be reached.
        pkg.salt = "bad$$".to_string();
        pkg.v = 7;

        let err = decrypt(&pkg, b"test").expect_err("expected algorithm rejection");
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedAlgorithm));

        pkg.alg = "aes-gcm".to_string();
        let err = decrypt(&pkg, b"test").expect_err("expected algorithm rejection");
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedAlgorithm));
    }

    #[test]
    fn test_unsupported_version() {
        let mut pkg = encrypt(b"hello", b"test", ITERS).unwrap();
        pkg.v = 2;
        let err = decrypt(&pkg, b"test").expect_err("expected version rejection");
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedVersion));
    }

    #[test]
    fn test_malformed_fields() {
        let pkg = encrypt(b"hello", b"test", ITERS).unwrap();

        let mut bad = pkg.clone();
        bad.ct = "not base64!".to_string();
        let err = decrypt(&bad, b"test").expect_err("expected malformed ct");
        assert_eq!(err.kind, Some(ErrorKind::MalformedPackage));

        let mut bad = pkg.clone();
        bad.iv = package::encode_field(&[0u8; 16]);
        let err = decrypt(&bad, b"test").expect_err("expected wrong iv length");
        assert_eq!(err.kind, Some(ErrorKind::MalformedPackage));

        let mut bad = pkg.clone();
        bad.salt = package::encode_field(&[0u8; 8]);
        let err = decrypt(&bad, b"test").expect_err("expected wrong salt length");
        assert_eq!(err.kind, Some(ErrorKind::MalformedPackage));

        let mut bad = pkg;
        bad.iters = 0;
        let err = decrypt(&bad, b"test").expect_err("expected zero iterations rejected");
        assert_eq!(err.kind, Some(ErrorKind::MalformedPackage));
    }

    #[test]
    fn test_encrypt_rejects_bad_input() {
        let err = encrypt(b"hello", b"", ITERS).expect_err("expected empty passphrase rejected");
        assert_eq!(err.kind, Some(ErrorKind::InvalidInput));

        for iters in [0, MIN_ITERATIONS - 1, MAX_ITERATIONS + 1] {
            let err = encrypt(b"hello", b"test", iters).expect_err("expected iterations rejected");
            assert_eq!(err.kind, Some(ErrorKind::InvalidInput));
        }
    }

    #[test]
    fn test_oversized_iterations_on_short_ciphertext_fail_cleanly() {
        let pkg = EncryptedPackage {
            filename: None,
            v: 1,
            alg: "AES-GCM".to_string(),
            iters: 50_000_000,
            salt: package::encode_field(&[0u8; SALT_LEN]),
            iv: package::encode_field(&[0u8; IV_LEN]),
            ct: package::encode_field(b"short"),
        };
        assert_decryption_failed(decrypt(&pkg, b"test"));
    }

    #[test]
    fn test_check_header_reports_cap_before_derivation() {
        let mut pkg = encrypt(b"hello", b"test", ITERS).unwrap();
        assert_eq!(check_header(&pkg).unwrap().advisory, None);

        pkg.iters = 50_000_000;
        pkg.ct = package::encode_field(b"short");
        let clamped = check_header(&pkg).unwrap();
        assert_eq!(clamped.iterations, MAX_ITERATIONS);
        assert_eq!(clamped.advisory, Some(Advisory::PackageCapped));

        // The cap still applies when authentication fails afterwards.
        assert_decryption_failed(decrypt(&pkg, b"test"));

        pkg.iters = u64::MAX;
        assert_eq!(check_header(&pkg).unwrap().advisory, Some(Advisory::PackageCapped));
        assert_decryption_failed(decrypt(&pkg, b"test"));
    }

    /// Derives twice at the ceiling, which is slow in debug builds.
    ///
    /// cargo test test_iteration_cap -- --ignored
    #[test]
    #[ignore]
    fn test_iteration_cap_roundtrip() {
        let mut pkg = encrypt(b"capped", b"test", MAX_ITERATIONS).unwrap();
        pkg.iters = 50_000_000;

        let decrypted = decrypt(&pkg, b"test").unwrap();
        assert_eq!(&decrypted.plaintext[..], b"capped");
        assert_eq!(decrypted.advisory, Some(Advisory::PackageCapped));
    }

    /// A package sealed with more than the ceiling cannot be opened once the
    /// count is capped. Uses a raw derivation above the ceiling, so it is
    /// slow too.
    ///
    /// cargo test test_iteration_cap -- --ignored
    #[test]
    #[ignore]
    fn test_iteration_cap_above_ceiling_fails() {
        let salt = [9u8; SALT_LEN];
        let iv = [8u8; IV_LEN];
        let key = derive_key(b"test", &salt, MAX_ITERATIONS + 1).unwrap();
        let ct = cipher_for(&key)
            .unwrap()
            .encrypt(Nonce::from_slice(&iv), &b"too many rounds"[..])
            .unwrap();

        let pkg = EncryptedPackage {
            filename: None,
            v: 1,
            alg: "AES-GCM".to_string(),
            iters: u64::from(MAX_ITERATIONS) + 1,
            salt: package::encode_field(&salt),
            iv: package::encode_field(&iv),
            ct: package::encode_field(&ct),
        };
        assert_decryption_failed(decrypt(&pkg, b"test"));
    }
}
