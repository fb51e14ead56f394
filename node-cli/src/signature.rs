use std::{fmt::Debug, sync::Arc};

use chainlite_core::{
    CryptoError, Transaction,
    crypto::{parse_public_key, verify_payload},
    pubkey_to_address,
};
use thiserror::Error;

use crate::config::SignatureMode;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature is missing")]
    Missing,
    #[error("public_key is required to verify the signature")]
    MissingPublicKey,
    #[error("sender {sender} does not match public key address {derived}")]
    AddressMismatch { sender: String, derived: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Checks that the sender authorized a transaction.
pub trait SignatureVerifier: Debug + Send + Sync {
    fn verify(&self, tx: &Transaction) -> Result<(), SignatureError>;
}

/// Accepts any non-empty signature string.
#[derive(Debug, Default)]
pub struct PresenceVerifier;

impl SignatureVerifier for PresenceVerifier {
    fn verify(&self, tx: &Transaction) -> Result<(), SignatureError> {
        if tx.signature.trim().is_empty() {
            return Err(SignatureError::Missing);
        }
        Ok(())
    }
}

/// ECDSA over secp256k1. The signed message is
/// [`Transaction::signing_payload`] and `sender` must be the address of
/// `public_key`.
#[derive(Debug, Default)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, tx: &Transaction) -> Result<(), SignatureError> {
        if tx.signature.trim().is_empty() {
            return Err(SignatureError::Missing);
        }
        let pubkey_hex = tx
            .public_key
            .as_deref()
            .ok_or(SignatureError::MissingPublicKey)?;
        let pubkey = parse_public_key(pubkey_hex)?;
        let derived = pubkey_to_address(&pubkey);
        if derived != tx.sender {
            return Err(SignatureError::AddressMismatch {
                sender: tx.sender.clone(),
                derived,
            });
        }
        let payload =
            Transaction::signing_payload(&tx.sender, &tx.recipient, tx.amount, tx.timestamp);
        verify_payload(&pubkey, &payload, &tx.signature)?;
        Ok(())
    }
}

pub fn verifier_for(mode: SignatureMode) -> Arc<dyn SignatureVerifier> {
    match mode {
        SignatureMode::Secp256k1 => Arc::new(Secp256k1Verifier),
        SignatureMode::Presence => Arc::new(PresenceVerifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlite_core::crypto::sign_payload;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn signed_tx(sk: &SecretKey) -> Transaction {
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), sk);
        let sender = pubkey_to_address(&pk);
        let payload = Transaction::signing_payload(&sender, "0xB", 5, 42);
        Transaction {
            signature: sign_payload(sk, &payload),
            sender,
            recipient: "0xB".into(),
            amount: 5,
            timestamp: 42,
            public_key: Some(hex::encode(pk.serialize())),
            hash: String::new(),
            block_index: None,
        }
    }

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_byte_array([byte; 32]).unwrap()
    }

    #[test]
    fn secp256k1_accepts_valid_signature() {
        assert!(Secp256k1Verifier.verify(&signed_tx(&key(7))).is_ok());
    }

    #[test]
    fn secp256k1_rejects_tampered_amount() {
        let mut tx = signed_tx(&key(7));
        tx.amount = 500;
        assert!(matches!(
            Secp256k1Verifier.verify(&tx),
            Err(SignatureError::Crypto(CryptoError::VerificationFailed))
        ));
    }

    #[test]
    fn secp256k1_rejects_foreign_sender() {
        let mut tx = signed_tx(&key(7));
        tx.sender = "0xA".into();
        assert!(matches!(
            Secp256k1Verifier.verify(&tx),
            Err(SignatureError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn secp256k1_rejects_sender_in_other_case() {
        let sk = key(7);
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);
        let sender = pubkey_to_address(&pk).to_uppercase().replacen("0X", "0x", 1);
        let payload = Transaction::signing_payload(&sender, "0xB", 5, 42);
        let tx = Transaction {
            signature: sign_payload(&sk, &payload),
            sender,
            ..signed_tx(&sk)
        };
        assert!(matches!(
            Secp256k1Verifier.verify(&tx),
            Err(SignatureError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn secp256k1_requires_public_key() {
        let mut tx = signed_tx(&key(7));
        tx.public_key = None;
        assert!(matches!(
            Secp256k1Verifier.verify(&tx),
            Err(SignatureError::MissingPublicKey)
        ));
    }

    #[test]
    fn presence_only_needs_text() {
        let mut tx = signed_tx(&key(9));
        tx.signature = "mock-signature".into();
        assert!(PresenceVerifier.verify(&tx).is_ok());
        tx.signature = "  ".into();
        assert!(matches!(
            PresenceVerifier.verify(&tx),
            Err(SignatureError::Missing)
        ));
    }
}
