//! Signing keys for producing metadata, used by the repository builders
//! and by tests. The verification path never touches these.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand_core::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use sha2::Sha256;
use signature::{RandomizedSigner, SignatureEncoding, Signer};

use crate::{key_id, KeyId, KeyType, KeyValue, PublicKey, Signature};

/// A private key able to sign canonical metadata bytes.
#[derive(Debug, Clone)]
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    Rsa(Box<rsa::RsaPrivateKey>),
}

impl SigningKey {
    pub fn generate_ed25519() -> Self {
        SigningKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    pub fn generate_rsa() -> Result<Self, rsa::Error> {
        rsa::RsaPrivateKey::new(&mut OsRng, 2048).map(|key| SigningKey::Rsa(Box::new(key)))
    }

    /// The wire-format public half: hex for Ed25519, PEM for RSA.
    pub fn public_key(&self) -> PublicKey {
        match self {
            SigningKey::Ed25519(key) => PublicKey {
                keytype: KeyType::Ed25519,
                keyval: KeyValue {
                    public: hex::encode(key.verifying_key().to_bytes()),
                },
            },
            SigningKey::Rsa(key) => PublicKey {
                keytype: KeyType::Rsa,
                keyval: KeyValue {
                    public: rsa::RsaPublicKey::from(key.as_ref())
                        .to_public_key_pem(LineEnding::LF)
                        .expect("PEM-encoding an RSA public key failed"),
                },
            },
        }
    }

    pub fn key_id(&self) -> KeyId {
        key_id(&self.public_key()).expect("public key serialization failed")
    }

    /// Sign canonical bytes, producing a wire-format signature object.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        match self {
            SigningKey::Ed25519(key) => Signature {
                keyid: self.key_id(),
                method: Some("ed25519".to_owned()),
                sig: hex::encode(key.sign(msg).to_bytes()),
            },
            SigningKey::Rsa(key) => {
                let signer = rsa::pss::SigningKey::<Sha256>::new(key.as_ref().clone());
                let sig = signer.sign_with_rng(&mut OsRng, msg);
                Signature {
                    keyid: self.key_id(),
                    method: Some("rsassa-pss".to_owned()),
                    sig: STANDARD.encode(sig.to_vec()),
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::verify_signature;

    #[test]
    fn test_ed25519_key_material_is_hex() {
        let key = SigningKey::generate_ed25519();
        let public = key.public_key();
        assert_eq!(public.keytype, KeyType::Ed25519);
        assert_eq!(public.keyval.public.len(), 64);
        assert!(hex::decode(&public.keyval.public).is_ok());
    }

    #[test]
    fn test_signature_carries_method_and_keyid() {
        let key = SigningKey::generate_ed25519();
        let sig = key.sign(b"payload");
        assert_eq!(sig.method.as_deref(), Some("ed25519"));
        assert_eq!(sig.keyid, key.key_id());
        assert!(verify_signature(&key.public_key(), b"payload", &sig));
    }
}
