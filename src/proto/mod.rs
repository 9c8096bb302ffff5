// Copyright (c) 2025 Crest Developers

//! Chain data model: blocks, the transaction sum type and their identities.
//!
//! Transactions are a tagged enum. Versioned variants (TransferV1/V2 and
//! friends) share one payload struct and carry the version tag alongside it,
//! so the differ and applier dispatch on shape, not on version.

pub mod wire;

use serde::{Deserialize, Serialize};

use crate::crypto::{digest, Address, BlockSignature, Digest, KeyPair, PublicKey};

/// An asset identifier. `None` is the native waves asset.
pub type AssetId = Option<Digest>;

/// Transaction or lease destination: a literal address or an alias that the
/// entities layer resolves at diff time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Address(Address),
    Alias(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisTx {
    pub recipient: Address,
    pub amount: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTx {
    pub sender_pk: PublicKey,
    pub recipient: Address,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    pub sender_pk: PublicKey,
    pub recipient: Recipient,
    pub amount_asset: AssetId,
    pub fee_asset: AssetId,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
    pub attachment: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTx {
    pub sender_pk: PublicKey,
    pub name: String,
    pub description: String,
    pub quantity: u64,
    pub decimals: u8,
    pub reissuable: bool,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReissueTx {
    pub sender_pk: PublicKey,
    pub asset_id: Digest,
    pub quantity: u64,
    pub reissuable: bool,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnTx {
    pub sender_pk: PublicKey,
    pub asset_id: Digest,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Buy,
    Sell,
}

/// A matcher order; two of these meet in an exchange transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub sender_pk: PublicKey,
    pub matcher_pk: PublicKey,
    pub amount_asset: AssetId,
    pub price_asset: AssetId,
    pub order_type: OrderType,
    pub price: u64,
    pub amount: u64,
    pub timestamp: u64,
    pub expiration: u64,
    pub matcher_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTx {
    pub buy_order: Order,
    pub sell_order: Order,
    pub price: u64,
    pub amount: u64,
    pub buy_matcher_fee: u64,
    pub sell_matcher_fee: u64,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseTx {
    pub sender_pk: PublicKey,
    pub recipient: Recipient,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseCancelTx {
    pub sender_pk: PublicKey,
    pub lease_id: Digest,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAliasTx {
    pub sender_pk: PublicKey,
    pub alias: String,
    pub fee: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassTransferEntry {
    pub recipient: Recipient,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassTransferTx {
    pub sender_pk: PublicKey,
    pub asset: AssetId,
    pub transfers: Vec<MassTransferEntry>,
    pub fee: u64,
    pub timestamp: u64,
    pub attachment: Vec<u8>,
}

/// The transaction sum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transaction {
    Genesis(GenesisTx),
    Payment(PaymentTx),
    Transfer { version: TxVersion, tx: TransferTx },
    Issue { version: TxVersion, tx: IssueTx },
    Reissue { version: TxVersion, tx: ReissueTx },
    Burn { version: TxVersion, tx: BurnTx },
    Exchange(ExchangeTx),
    Lease { version: TxVersion, tx: LeaseTx },
    LeaseCancel { version: TxVersion, tx: LeaseCancelTx },
    CreateAlias { version: TxVersion, tx: CreateAliasTx },
    MassTransfer(MassTransferTx),
}

impl Transaction {
    /// Transaction identity: the digest of the serialised transaction.
    /// Issue and Lease transactions reuse it as the asset / lease id.
    pub fn id(&self) -> Digest {
        let bytes = bincode::serialize(self).expect("transaction is serializable");
        digest(&bytes)
    }

    pub fn fee(&self) -> u64 {
        match self {
            Transaction::Genesis(_) => 0,
            Transaction::Payment(tx) => tx.fee,
            Transaction::Transfer { tx, .. } => tx.fee,
            Transaction::Issue { tx, .. } => tx.fee,
            Transaction::Reissue { tx, .. } => tx.fee,
            Transaction::Burn { tx, .. } => tx.fee,
            Transaction::Exchange(tx) => tx.fee,
            Transaction::Lease { tx, .. } => tx.fee,
            Transaction::LeaseCancel { tx, .. } => tx.fee,
            Transaction::CreateAlias { tx, .. } => tx.fee,
            Transaction::MassTransfer(tx) => tx.fee,
        }
    }

    /// The asset the fee is paid in. Only Transfer may use a non-waves fee
    /// asset.
    pub fn fee_asset(&self) -> AssetId {
        match self {
            Transaction::Transfer { tx, .. } => tx.fee_asset,
            _ => None,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Transaction::Genesis(tx) => tx.timestamp,
            Transaction::Payment(tx) => tx.timestamp,
            Transaction::Transfer { tx, .. } => tx.timestamp,
            Transaction::Issue { tx, .. } => tx.timestamp,
            Transaction::Reissue { tx, .. } => tx.timestamp,
            Transaction::Burn { tx, .. } => tx.timestamp,
            Transaction::Exchange(tx) => tx.timestamp,
            Transaction::Lease { tx, .. } => tx.timestamp,
            Transaction::LeaseCancel { tx, .. } => tx.timestamp,
            Transaction::CreateAlias { tx, .. } => tx.timestamp,
            Transaction::MassTransfer(tx) => tx.timestamp,
        }
    }

    /// Sender public key; Genesis transactions have none.
    /// For Exchange the sender is the matcher, who pays the transaction fee.
    pub fn sender_pk(&self) -> Option<PublicKey> {
        match self {
            Transaction::Genesis(_) => None,
            Transaction::Payment(tx) => Some(tx.sender_pk),
            Transaction::Transfer { tx, .. } => Some(tx.sender_pk),
            Transaction::Issue { tx, .. } => Some(tx.sender_pk),
            Transaction::Reissue { tx, .. } => Some(tx.sender_pk),
            Transaction::Burn { tx, .. } => Some(tx.sender_pk),
            Transaction::Exchange(tx) => Some(tx.buy_order.matcher_pk),
            Transaction::Lease { tx, .. } => Some(tx.sender_pk),
            Transaction::LeaseCancel { tx, .. } => Some(tx.sender_pk),
            Transaction::CreateAlias { tx, .. } => Some(tx.sender_pk),
            Transaction::MassTransfer(tx) => Some(tx.sender_pk),
        }
    }
}

/// PoS consensus fields carried in every block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NxtConsensus {
    /// Difficulty parameter for the next block.
    pub base_target: u64,
    /// Deterministic chain of generator entropy.
    pub generation_signature: Digest,
}

impl NxtConsensus {
    /// The generation signature of a child block minted by `generator`.
    pub fn next_generation_signature(&self, generator: &PublicKey) -> Digest {
        let mut data = Vec::with_capacity(64);
        data.extend_from_slice(self.generation_signature.as_bytes());
        data.extend_from_slice(generator.as_bytes());
        digest(&data)
    }
}

pub const BLOCK_VERSION: u8 = 2;
pub const GENESIS_BLOCK_VERSION: u8 = 1;

/// A block. The signature is the block identity; `parent` chains it to the
/// previous block's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub version: u8,
    pub timestamp: u64,
    pub parent: BlockSignature,
    pub consensus: NxtConsensus,
    /// Feature ids this block's generator votes for.
    pub features: Vec<u16>,
    pub transactions: Vec<Transaction>,
    pub generator: PublicKey,
    pub signature: BlockSignature,
}

impl Block {
    pub fn id(&self) -> BlockSignature {
        self.signature
    }

    /// The bytes covered by the block signature: everything but the
    /// signature itself.
    pub fn bytes_to_sign(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = BlockSignature::ZERO;
        bincode::serialize(&unsigned).expect("block is serializable")
    }

    pub fn sign(&mut self, kp: &KeyPair) {
        self.generator = kp.public();
        self.signature = kp.sign(&self.bytes_to_sign());
    }

    pub fn verify_signature(&self) -> bool {
        if self.version == GENESIS_BLOCK_VERSION {
            // Genesis carries a content-derived signature, not a key one.
            return self.signature == genesis_signature(&self.bytes_to_sign());
        }
        self.generator.verify(&self.bytes_to_sign(), &self.signature)
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        bincode::serialize(self).expect("block is serializable")
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Block, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Build the genesis block from the initial coin distribution.
    pub fn genesis(transfers: &[(Address, u64)], timestamp: u64, base_target: u64) -> Block {
        let transactions = transfers
            .iter()
            .map(|(recipient, amount)| {
                Transaction::Genesis(GenesisTx {
                    recipient: *recipient,
                    amount: *amount,
                    timestamp,
                })
            })
            .collect();
        let mut block = Block {
            version: GENESIS_BLOCK_VERSION,
            timestamp,
            parent: BlockSignature::ZERO,
            consensus: NxtConsensus {
                base_target,
                generation_signature: digest(b"crest-genesis-generation-signature"),
            },
            features: Vec::new(),
            transactions,
            generator: PublicKey::ZERO,
            signature: BlockSignature::ZERO,
        };
        block.signature = genesis_signature(&block.bytes_to_sign());
        block
    }
}

/// Genesis has no generator key pair, so its 64-byte identity is derived
/// from the block content.
fn genesis_signature(unsigned_bytes: &[u8]) -> BlockSignature {
    let front = digest(unsigned_bytes);
    let mut tagged = unsigned_bytes.to_vec();
    tagged.extend_from_slice(b"crest-genesis");
    let back = digest(&tagged);
    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(front.as_bytes());
    sig[32..].copy_from_slice(back.as_bytes());
    BlockSignature(sig)
}
