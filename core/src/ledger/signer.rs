use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use soroban_sdk::xdr::{
    DecoratedSignature, Limits, SignatureHint, Transaction, TransactionEnvelope,
    TransactionV1Envelope, WriteXdr,
};
use stellar_strkey::Strkey;

use crate::errors::LedgerError;

/// An ed25519 account key held in process.
pub struct LocalSigner {
    signing_key: SigningKey,
    public_key: [u8; 32],
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = signing_key.verifying_key().to_bytes();
        Self {
            signing_key,
            public_key,
        }
    }

    /// Accepts an `S...` secret strkey or a 64-character hex seed.
    pub fn from_secret(secret: &str) -> Result<Self, LedgerError> {
        let secret = secret.trim();
        if secret.starts_with('S') {
            return match Strkey::from_string(secret) {
                Ok(Strkey::PrivateKeyEd25519(key)) => Ok(Self::from_seed(key.0)),
                _ => Err(LedgerError::InvalidArgument(
                    "secret key is not a valid S... strkey".to_string(),
                )),
            };
        }

        let bytes = hex::decode(secret)
            .map_err(|e| LedgerError::InvalidArgument(format!("secret key hex: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            LedgerError::InvalidArgument("secret key seed must be 32 bytes".to_string())
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    /// The `G...` account address.
    pub fn address(&self) -> String {
        Strkey::PublicKeyEd25519(stellar_strkey::ed25519::PublicKey(self.public_key)).to_string()
    }

    pub fn sign_transaction(
        &self,
        tx: Transaction,
        network_passphrase: &str,
    ) -> Result<TransactionEnvelope, LedgerError> {
        let hash = transaction_hash(&tx, &network_id(network_passphrase))?;
        let sig = self.signing_key.sign(&hash);

        let mut hint = [0u8; 4];
        hint.copy_from_slice(&self.public_key[28..32]);
        let decorated = DecoratedSignature {
            hint: SignatureHint(hint),
            signature: sig
                .to_bytes()
                .to_vec()
                .try_into()
                .map_err(|_| LedgerError::Xdr("signature conversion failed".into()))?,
        };

        Ok(TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: vec![decorated]
                .try_into()
                .map_err(|_| LedgerError::Xdr("envelope signatures failed".into()))?,
        }))
    }
}

pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

pub fn transaction_hash(tx: &Transaction, net_id: &[u8; 32]) -> Result<[u8; 32], LedgerError> {
    let tx_xdr = tx
        .to_xdr(Limits::none())
        .map_err(|e| LedgerError::Xdr(format!("XDR encode error: {e}")))?;
    let mut h = Sha256::new();
    h.update(net_id);
    h.update(2i32.to_be_bytes()); // ENVELOPE_TYPE_TX
    h.update(&tx_xdr);
    Ok(h.finalize().into())
}
