use crate::blockchain::core::state::WalletList;
use crate::crypto;
use crate::encoding::{Address, BlockHash, TxId};
use crate::error::ChainError;
use crate::transaction::{Tag, Transaction};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Nonces are reset once they reach this many bits.
pub const MAX_NONCE_BITS: usize = 512;

/// A proof-of-work nonce: a bit string grown one bit at a time.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Nonce {
    bytes: Vec<u8>,
    len: usize,
}

impl Nonce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[self.len / 8] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.len = 0;
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.len && self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// `nonce ++ segment` as a bit-level concatenation, zero padded to a byte.
    pub fn prepend_to(&self, segment: &[u8]) -> Vec<u8> {
        let shift = self.len % 8;
        let mut out = Vec::with_capacity(self.bytes.len() + segment.len() + 1);
        out.extend_from_slice(&self.bytes);
        if shift == 0 {
            out.extend_from_slice(segment);
            return out;
        }
        for &byte in segment {
            if let Some(last) = out.last_mut() {
                *last |= byte >> shift;
            }
            out.push(byte << (8 - shift));
        }
        out
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len {
            f.write_str(if self.bit(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self)
    }
}

impl std::str::FromStr for Nonce {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_NONCE_BITS {
            return Err(ChainError::SerializationError(format!(
                "Nonce longer than {} bits",
                MAX_NONCE_BITS
            )));
        }
        let mut nonce = Nonce::new();
        for c in s.chars() {
            match c {
                '0' => nonce.push_bit(false),
                '1' => nonce.push_bit(true),
                other => {
                    return Err(ChainError::SerializationError(format!(
                        "Invalid nonce character {:?}",
                        other
                    )))
                }
            }
        }
        Ok(nonce)
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The byte sequence hashed together with a nonce while mining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment(Vec<u8>);

impl DataSegment {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        DataSegment(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// SHA-384(nonce ++ segment).
    pub fn pow_hash(&self, nonce: &Nonce) -> BlockHash {
        crypto::sha384(&nonce.prepend_to(&self.0))
    }
}

/// Largest hash (big endian) whose leading `difficulty` bits are zero.
pub fn hash_to_target(difficulty: u32) -> [u8; BlockHash::LEN] {
    let mut target = [0xFF; BlockHash::LEN];
    let leading_zeros = (difficulty / 8) as usize;
    let partial_bits = difficulty % 8;

    for item in target.iter_mut().take(leading_zeros) {
        *item = 0;
    }
    if leading_zeros < BlockHash::LEN && partial_bits > 0 {
        target[leading_zeros] = 0xFF >> partial_bits;
    }
    target
}

/// True when the leading `difficulty` bits of `hash` are zero.
pub fn meets_difficulty(hash: &BlockHash, difficulty: u32) -> bool {
    hash.0 <= hash_to_target(difficulty)
}

/// Wallet list carried by a block: inline in memory, a content hash on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WalletListRef {
    Hash(BlockHash),
    Inline(WalletList),
}

impl WalletListRef {
    pub fn hash(&self) -> BlockHash {
        match self {
            WalletListRef::Hash(hash) => *hash,
            WalletListRef::Inline(list) => list.hash(),
        }
    }

    pub fn as_inline(&self) -> Option<&WalletList> {
        match self {
            WalletListRef::Inline(list) => Some(list),
            WalletListRef::Hash(_) => None,
        }
    }
}

/// A block in shadow form: transaction ids only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub previous_block: BlockHash,
    pub timestamp: u64,
    pub last_retarget: u64,
    pub diff: u32,
    pub nonce: Nonce,
    /// Proof-of-work hash of the data segment and nonce.
    pub hash: BlockHash,
    pub indep_hash: BlockHash,
    pub txs: Vec<TxId>,
    pub wallet_list: WalletListRef,
    pub reward_addr: Option<Address>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub weave_size: u64,
    pub block_size: u64,
}

/// A block together with its transaction bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullBlock {
    pub block: Block,
    pub txs: Vec<Transaction>,
}

impl FullBlock {
    pub fn new(block: Block, txs: Vec<Transaction>) -> Self {
        FullBlock { block, txs }
    }
}

/// Inputs to the block data segment of the block following `current`.
pub struct SegmentInputs<'a> {
    pub current: &'a Block,
    pub recall: &'a Block,
    pub txs: &'a [Transaction],
    pub reward_addr: Option<Address>,
    pub tags: &'a [Tag],
    pub timestamp: u64,
    pub last_retarget: u64,
    pub diff: u32,
    pub wallet_list_hash: BlockHash,
}

pub fn block_data_segment(inputs: &SegmentInputs<'_>) -> DataSegment {
    let mut base = Vec::with_capacity(256 + inputs.txs.len() * 32);
    base.extend_from_slice(inputs.current.indep_hash.as_bytes());
    base.extend_from_slice(&(inputs.current.height + 1).to_be_bytes());
    base.extend_from_slice(inputs.recall.indep_hash.as_bytes());
    base.extend_from_slice(inputs.recall.hash.as_bytes());
    base.extend_from_slice(&(inputs.txs.len() as u64).to_be_bytes());
    for tx in inputs.txs {
        base.extend_from_slice(tx.id.as_bytes());
    }
    match inputs.reward_addr {
        Some(addr) => base.extend_from_slice(addr.as_bytes()),
        None => base.extend_from_slice(b"unclaimed"),
    }
    encode_tags(&mut base, inputs.tags);
    base.extend_from_slice(inputs.wallet_list_hash.as_bytes());
    let block_size: u64 = inputs.txs.iter().map(|tx| tx.data_size() as u64).sum();
    base.extend_from_slice(&(inputs.current.weave_size + block_size).to_be_bytes());

    let mut segment = crypto::sha384(&base).0.to_vec();
    segment.extend_from_slice(&inputs.timestamp.to_be_bytes());
    segment.extend_from_slice(&inputs.last_retarget.to_be_bytes());
    segment.extend_from_slice(&inputs.diff.to_be_bytes());
    DataSegment(segment)
}

fn encode_tags(buf: &mut Vec<u8>, tags: &[Tag]) {
    buf.extend_from_slice(&(tags.len() as u64).to_be_bytes());
    for tag in tags {
        buf.extend_from_slice(&(tag.name.len() as u64).to_be_bytes());
        buf.extend_from_slice(&tag.name);
        buf.extend_from_slice(&(tag.value.len() as u64).to_be_bytes());
        buf.extend_from_slice(&tag.value);
    }
}

impl Block {
    /// First block of a weave, crediting `ledger`.
    pub fn genesis(ledger: &WalletList, timestamp: u64, diff: u32) -> Block {
        let wallet_list = WalletListRef::Inline(ledger.clone());
        let mut seed = wallet_list.hash().0.to_vec();
        seed.extend_from_slice(&timestamp.to_be_bytes());
        let mut block = Block {
            height: 0,
            previous_block: BlockHash::zero(),
            timestamp,
            last_retarget: timestamp,
            diff,
            nonce: Nonce::new(),
            hash: crypto::sha384(&seed),
            indep_hash: BlockHash::zero(),
            txs: Vec::new(),
            wallet_list,
            reward_addr: None,
            tags: Vec::new(),
            weave_size: 0,
            block_size: 0,
        };
        block.indep_hash = block.compute_indep_hash();
        block
    }

    /// Hash over every consensus field, including the proof of work.
    pub fn compute_indep_hash(&self) -> BlockHash {
        let mut buf = Vec::with_capacity(512 + self.txs.len() * 32);
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&(self.nonce.len() as u64).to_be_bytes());
        buf.extend_from_slice(&self.nonce.prepend_to(&[]));
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(self.previous_block.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.last_retarget.to_be_bytes());
        buf.extend_from_slice(&self.diff.to_be_bytes());
        buf.extend_from_slice(&(self.txs.len() as u64).to_be_bytes());
        for id in &self.txs {
            buf.extend_from_slice(id.as_bytes());
        }
        buf.extend_from_slice(self.wallet_list.hash().as_bytes());
        match self.reward_addr {
            Some(addr) => buf.extend_from_slice(addr.as_bytes()),
            None => buf.extend_from_slice(b"unclaimed"),
        }
        encode_tags(&mut buf, &self.tags);
        buf.extend_from_slice(&self.weave_size.to_be_bytes());
        buf.extend_from_slice(&self.block_size.to_be_bytes());
        crypto::sha384(&buf)
    }

    pub fn wallet_list_hash(&self) -> BlockHash {
        self.wallet_list.hash()
    }
}

/// Height of the recall block for the block following one with `indep_hash`
/// at `height`.
pub fn calculate_recall_block(indep_hash: &BlockHash, height: u64) -> u64 {
    if height == 0 {
        return 0;
    }
    let modulus = height as u128;
    indep_hash
        .as_bytes()
        .iter()
        .fold(0u128, |acc, &b| (acc * 256 + b as u128) % modulus) as u64
}

/// Hash at `height` in a newest-first hash list.
pub fn block_hash_at_height(hash_list: &[BlockHash], height: u64) -> Option<&BlockHash> {
    let len = hash_list.len() as u64;
    if height >= len {
        return None;
    }
    hash_list.get((len - 1 - height) as usize)
}
