//! Key material for one wallet and the JSON file it lives in.

use std::{fs, path::Path};

use anyhow::{Context, bail};
use chainlite_core::{
    Transaction, TransactionRequest,
    crypto::{parse_secret_key, pubkey_to_address, sign_payload},
};
use rand::RngCore;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct WalletFile {
    secret_key: String,
    public_key: String,
    address: String,
}

#[derive(Debug, Clone)]
pub struct Wallet {
    secret: SecretKey,
    public: PublicKey,
}

impl Wallet {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            // zero and values past the curve order are not valid keys
            if let Ok(secret) = SecretKey::from_byte_array(bytes) {
                return Self::from_secret(secret);
            }
        }
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
        Self { secret, public }
    }

    pub fn address(&self) -> String {
        pubkey_to_address(&self.public)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Signed `POST /transactions` body.
    pub fn sign_transfer(&self, recipient: &str, amount: u64, timestamp: i64) -> TransactionRequest {
        let sender = self.address();
        let payload = Transaction::signing_payload(&sender, recipient, amount, timestamp);
        TransactionRequest {
            sender,
            recipient: recipient.to_string(),
            amount: amount.into(),
            timestamp: Some(timestamp),
            signature: sign_payload(&self.secret, &payload),
            public_key: Some(self.public_key_hex()),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = WalletFile {
            secret_key: hex::encode(self.secret.secret_bytes()),
            public_key: self.public_key_hex(),
            address: self.address(),
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading wallet {}", path.display()))?;
        let file: WalletFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing wallet {}", path.display()))?;
        let secret = parse_secret_key(&file.secret_key)?;
        let wallet = Self::from_secret(secret);
        if wallet.address() != file.address {
            bail!(
                "wallet {} is inconsistent: stored address {} does not match its key",
                path.display(),
                file.address
            );
        }
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlite_core::crypto::{parse_public_key, verify_payload};

    #[test]
    fn signed_transfer_verifies_against_sender() {
        let wallet = Wallet::generate();
        let req = wallet.sign_transfer("0xB", 12, 1_750_000_000_000);
        assert_eq!(req.sender, wallet.address());

        let pk = parse_public_key(req.public_key.as_deref().unwrap()).unwrap();
        assert_eq!(pubkey_to_address(&pk), req.sender);
        let payload = Transaction::signing_payload(&req.sender, "0xB", 12, 1_750_000_000_000);
        assert!(verify_payload(&pk, &payload, &req.signature).is_ok());
    }

    #[test]
    fn large_amounts_are_sent_unrounded() {
        let wallet = Wallet::generate();
        let amount = (1u64 << 53) + 1;
        let req = wallet.sign_transfer("0xB", amount, 1);
        assert_eq!(req.amount.as_u64(), Some(amount));
        let body = serde_json::to_string(&req).unwrap();
        assert!(body.contains("\"amount\":9007199254740993"));
    }

    #[test]
    fn save_then_load_keeps_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/wallet.json");
        let wallet = Wallet::generate();
        wallet.save(&path).unwrap();
        let loaded = Wallet::load(&path).unwrap();
        assert_eq!(loaded.address(), wallet.address());
    }

    #[test]
    fn tampered_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        Wallet::generate().save(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        let mut file: WalletFile = serde_json::from_str(&raw).unwrap();
        file.address = "0xdeadbeef".to_string();
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        assert!(Wallet::load(&path).is_err());
    }
}
