/// Transaction types for WeaveChain
use crate::consensus::Winston;
use crate::crypto::{self, KeyPair};
use crate::encoding::{b64, winston, Address, TxId};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};

/// A name/value pair attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(with = "b64")]
    pub name: Vec<u8>,
    #[serde(with = "b64")]
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Tag {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A signed transfer and/or data upload.
///
/// `last_tx` is the anchor: empty or the sender's last transaction id
/// (ledger anchored), or a recent block hash (block anchored, post fork).
/// An empty `target` means the transaction moves no tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    #[serde(with = "b64")]
    pub last_tx: Vec<u8>,
    #[serde(with = "b64")]
    pub owner: Vec<u8>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(with = "b64")]
    pub target: Vec<u8>,
    #[serde(with = "winston")]
    pub quantity: Winston,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    #[serde(with = "winston")]
    pub reward: Winston,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Unsigned transaction; `sign` fills in owner, signature and id.
    pub fn new(
        last_tx: Vec<u8>,
        target: Option<Address>,
        quantity: Winston,
        data: Vec<u8>,
        reward: Winston,
    ) -> Self {
        Transaction {
            id: TxId::zero(),
            last_tx,
            owner: Vec::new(),
            tags: Vec::new(),
            target: target.map(|a| a.0.to_vec()).unwrap_or_default(),
            quantity,
            data,
            reward,
            signature: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Canonical bytes covered by the signature. Each field is length
    /// prefixed; `id` and `signature` are excluded.
    pub fn signable_message(&self) -> Vec<u8> {
        fn field(message: &mut Vec<u8>, bytes: &[u8]) {
            message.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
            message.extend_from_slice(bytes);
        }

        let mut message = Vec::with_capacity(self.data.len() + self.owner.len() + 256);
        field(&mut message, &self.owner);
        field(&mut message, &self.target);
        field(&mut message, &self.data);
        field(&mut message, self.quantity.to_string().as_bytes());
        field(&mut message, self.reward.to_string().as_bytes());
        field(&mut message, &self.last_tx);
        message.extend_from_slice(&(self.tags.len() as u64).to_be_bytes());
        for tag in &self.tags {
            field(&mut message, &tag.name);
            field(&mut message, &tag.value);
        }
        message
    }

    pub fn sign(mut self, keypair: &KeyPair) -> Result<Self, ChainError> {
        self.owner = keypair.owner().to_vec();
        let signature = keypair.sign(&self.signable_message())?;
        self.signature = signature.to_vec();
        self.id = Self::id_from_signature(&self.signature);
        Ok(self)
    }

    pub fn id_from_signature(signature: &[u8]) -> TxId {
        TxId(crypto::sha256(signature))
    }

    pub fn owner_address(&self) -> Address {
        crypto::address_from_owner(&self.owner)
    }

    /// `None` for data-only transactions or malformed targets.
    pub fn target_address(&self) -> Option<Address> {
        Address::from_slice(&self.target)
    }

    /// `reward + quantity`, or `None` if it does not fit a Winston.
    pub fn total_cost(&self) -> Option<Winston> {
        self.reward.checked_add(self.quantity)
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn tags_size(&self) -> usize {
        self.tags.iter().map(|t| t.name.len() + t.value.len()).sum()
    }

    pub fn is_block_anchored(&self) -> bool {
        self.last_tx.len() == crate::encoding::BlockHash::LEN
    }
}
