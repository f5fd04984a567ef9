//! Digest helpers shared by metadata and target-file verification.

use sha2::{Digest, Sha256, Sha512};

/// Lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(<Sha256 as Digest>::new().chain_update(data).finalize())
}

/// Lowercase hex SHA-512 digest of `data`.
pub fn sha512_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(<Sha512 as Digest>::new().chain_update(data).finalize())
}

/// Compare `data` against a hex-encoded SHA-256 digest. Digest case is
/// insignificant.
pub fn verify_sha256(expected_hex: &str, data: impl AsRef<[u8]>) -> bool {
    sha256_hex(data).eq_ignore_ascii_case(expected_hex)
}

/// Compare `data` against a hex-encoded SHA-512 digest. Digest case is
/// insignificant.
pub fn verify_sha512(expected_hex: &str, data: impl AsRef<[u8]>) -> bool {
    sha512_hex(data).eq_ignore_ascii_case(expected_hex)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        // Well-known digest of the empty input.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_sha256() {
        let digest = sha256_hex(b"app.bin");
        assert!(verify_sha256(&digest, b"app.bin"));
        assert!(verify_sha256(&digest.to_uppercase(), b"app.bin"));
        assert!(!verify_sha256(&digest, b"other"));
    }

    #[test]
    fn test_verify_sha512() {
        let digest = sha512_hex(b"app.bin");
        assert!(verify_sha512(&digest, b"app.bin"));
        assert!(!verify_sha512(&digest, b"other"));
    }
}
