use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// `0x` + hex of the first 20 bytes of sha256(compressed pubkey).
pub fn pubkey_to_address(pubkey: &PublicKey) -> String {
    let digest = Sha256::digest(pubkey.serialize());
    format!("0x{}", hex::encode(&digest[..20]))
}

pub fn parse_public_key(pubkey_hex: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(pubkey_hex.trim_start_matches("0x"))
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

pub fn parse_secret_key(secret_hex: &str) -> Result<SecretKey, CryptoError> {
    let bytes = hex::decode(secret_hex.trim().trim_start_matches("0x"))
        .map_err(|_| CryptoError::InvalidSecretKey)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSecretKey)?;
    SecretKey::from_byte_array(arr).map_err(|_| CryptoError::InvalidSecretKey)
}

fn digest_message(payload: &str) -> Message {
    let hash = Sha256::digest(payload.as_bytes());
    Message::from_digest(hash.into())
}

/// Hex-encoded compact ECDSA signature over sha256(payload).
pub fn sign_payload(secret: &SecretKey, payload: &str) -> String {
    let secp = Secp256k1::new();
    let sig = secp.sign_ecdsa(digest_message(payload), secret);
    hex::encode(sig.serialize_compact())
}

pub fn verify_payload(
    pubkey: &PublicKey,
    payload: &str,
    signature_hex: &str,
) -> Result<(), CryptoError> {
    let sig_bytes =
        hex::decode(signature_hex).map_err(|_| CryptoError::InvalidSignatureEncoding)?;
    let signature =
        Signature::from_compact(&sig_bytes).map_err(|_| CryptoError::InvalidSignatureEncoding)?;
    Secp256k1::verification_only()
        .verify_ecdsa(digest_message(payload), &signature, pubkey)
        .map_err(|_| CryptoError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn keypair() -> (SecretKey, PublicKey) {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let sk = SecretKey::from_byte_array(bytes).expect("random key in range");
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);
        (sk, pk)
    }

    #[test]
    fn sign_then_verify() {
        let (sk, pk) = keypair();
        let sig = sign_payload(&sk, "0xA|0xB|5|1");
        assert!(verify_payload(&pk, "0xA|0xB|5|1", &sig).is_ok());
    }

    #[test]
    fn verify_rejects_other_payload() {
        let (sk, pk) = keypair();
        let sig = sign_payload(&sk, "0xA|0xB|5|1");
        assert!(matches!(
            verify_payload(&pk, "0xA|0xB|6|1", &sig),
            Err(CryptoError::VerificationFailed)
        ));
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        let (_, pk) = keypair();
        assert!(matches!(
            verify_payload(&pk, "x", "mock-signature"),
            Err(CryptoError::InvalidSignatureEncoding)
        ));
    }

    #[test]
    fn address_is_stable_and_prefixed() {
        let (sk, pk) = keypair();
        let addr = pubkey_to_address(&pk);
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
        let parsed = parse_public_key(&hex::encode(pk.serialize())).unwrap();
        assert_eq!(pubkey_to_address(&parsed), addr);
        let again = parse_secret_key(&hex::encode(sk.secret_bytes())).unwrap();
        assert_eq!(again, sk);
    }
}
