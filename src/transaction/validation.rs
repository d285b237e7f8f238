/// Validation logic for transactions separated from type definitions
use crate::blockchain::WalletList;
use crate::cache::TxErrorLog;
use crate::config::ProtocolParams;
use crate::crypto;
use crate::encoding::{Address, BlockHash, TxId};
use crate::fees;
use crate::transaction::types::Transaction;
use serde::Serialize;
use std::fmt;
use tracing::debug;

pub const MAX_ID_SIZE: usize = 32;
pub const MAX_LEDGER_ANCHOR_SIZE: usize = 32;
pub const MAX_BLOCK_ANCHOR_SIZE: usize = BlockHash::LEN;
pub const MAX_OWNER_SIZE: usize = 512;
pub const MAX_TAGS_SIZE: usize = 2048;
pub const MAX_TARGET_SIZE: usize = 32;
pub const MAX_AMOUNT_SIZE: usize = 21;
pub const MAX_SIGNATURE_SIZE: usize = 512;

/// Why a transaction failed `verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    QuantityNegative,
    SameOwnerAsTarget,
    TxTooCheap,
    TxFieldsTooLarge,
    TagFieldIllegallySpecified,
    LastTxNotValid,
    TxIdNotValid,
    Overspend,
    TxSignatureNotValid,
}

impl InvalidReason {
    pub fn code(&self) -> &'static str {
        match self {
            InvalidReason::QuantityNegative => "quantity_negative",
            InvalidReason::SameOwnerAsTarget => "same_owner_as_target",
            InvalidReason::TxTooCheap => "tx_too_cheap",
            InvalidReason::TxFieldsTooLarge => "tx_fields_too_large",
            InvalidReason::TagFieldIllegallySpecified => "tag_field_illegally_specified",
            InvalidReason::LastTxNotValid => "last_tx_not_valid",
            InvalidReason::TxIdNotValid => "tx_id_not_valid",
            InvalidReason::Overspend => "overspend",
            InvalidReason::TxSignatureNotValid => "tx_signature_not_valid",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Stateless rule engine for transactions. Rejections are recorded in the
/// shared error log keyed by transaction id.
#[derive(Clone, Default)]
pub struct TxValidator {
    params: ProtocolParams,
    error_log: TxErrorLog,
}

impl TxValidator {
    pub fn new(params: ProtocolParams) -> Self {
        Self::with_error_log(params, TxErrorLog::default())
    }

    pub fn with_error_log(params: ProtocolParams, error_log: TxErrorLog) -> Self {
        TxValidator { params, error_log }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn error_log(&self) -> &TxErrorLog {
        &self.error_log
    }

    /// Last recorded rejection reasons for `id`.
    pub fn reasons(&self, id: &TxId) -> Option<Vec<InvalidReason>> {
        self.error_log.reasons(id)
    }

    /// Check `tx` against `ledger`. Every failing rule is reported; the
    /// signature is verified only once all other rules pass.
    pub fn verify(
        &self,
        tx: &Transaction,
        diff: u32,
        height: u64,
        ledger: &WalletList,
        timestamp: u64,
    ) -> Result<(), Vec<InvalidReason>> {
        let mut reasons = Vec::new();
        let sender = tx.owner_address();
        let target = tx.target_address();

        if tx.quantity < 0 {
            reasons.push(InvalidReason::QuantityNegative);
        }
        if tx.target == sender.0 {
            reasons.push(InvalidReason::SameOwnerAsTarget);
        }
        let min_fee = fees::min_fee(
            tx.data_size(),
            diff,
            height,
            ledger,
            target.as_ref(),
            timestamp,
            &self.params,
        );
        if tx.reward < min_fee {
            reasons.push(InvalidReason::TxTooCheap);
        }
        if !self.fields_within_limits(tx, height) {
            reasons.push(InvalidReason::TxFieldsTooLarge);
        }
        if !tags_well_formed(tx) {
            reasons.push(InvalidReason::TagFieldIllegallySpecified);
        }
        if !self.params.is_post_fork(height) && tx.last_tx != ledger.last_tx(&sender) {
            reasons.push(InvalidReason::LastTxNotValid);
        }
        if tx.id != Transaction::id_from_signature(&tx.signature) {
            reasons.push(InvalidReason::TxIdNotValid);
        }
        if overspends(tx, ledger) {
            reasons.push(InvalidReason::Overspend);
        }
        if reasons.is_empty()
            && crypto::verify_signature(&tx.owner, &tx.signable_message(), &tx.signature).is_err()
        {
            reasons.push(InvalidReason::TxSignatureNotValid);
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            debug!(tx = %tx.id, height, reasons = ?reasons, "Transaction failed verification");
            self.error_log.record(tx.id, reasons.clone());
            Err(reasons)
        }
    }

    /// Verify `txs` in order, each against the ledger produced by the ones
    /// before it, so a double spend inside the batch fails.
    pub fn verify_batch(
        &self,
        txs: &[Transaction],
        diff: u32,
        height: u64,
        ledger: &WalletList,
        timestamp: u64,
    ) -> bool {
        if txs.len() > self.params.block_tx_count_limit {
            debug!(count = txs.len(), "Batch exceeds transaction count limit");
            return false;
        }
        let data_size: usize = txs.iter().map(Transaction::data_size).sum();
        if data_size > self.params.block_tx_data_size_limit {
            debug!(data_size, "Batch exceeds data size limit");
            return false;
        }

        let mut ledger = ledger.clone();
        for tx in txs {
            if self.verify(tx, diff, height, &ledger, timestamp).is_err() {
                return false;
            }
            ledger = ledger.apply_transaction(tx);
        }
        true
    }

    fn fields_within_limits(&self, tx: &Transaction, height: u64) -> bool {
        let anchor_limit = if self.params.is_post_fork(height) {
            MAX_BLOCK_ANCHOR_SIZE
        } else {
            MAX_LEDGER_ANCHOR_SIZE
        };
        tx.id.as_bytes().len() <= MAX_ID_SIZE
            && tx.last_tx.len() <= anchor_limit
            && tx.owner.len() <= MAX_OWNER_SIZE
            && tx.tags_size() <= MAX_TAGS_SIZE
            && tx.target.len() <= MAX_TARGET_SIZE
            && tx.quantity.to_string().len() <= MAX_AMOUNT_SIZE
            && tx.reward.to_string().len() <= MAX_AMOUNT_SIZE
            && tx.data_size() <= self.params.tx_data_size_limit
            && tx.signature.len() <= MAX_SIGNATURE_SIZE
    }
}

fn tags_well_formed(tx: &Transaction) -> bool {
    tx.tags.iter().all(|tag| !tag.name.is_empty())
}

/// Neither the sender nor the target may end up negative or as an entry
/// that was never funded. Amounts that overflow a Winston count as
/// overspending.
fn overspends(tx: &Transaction, ledger: &WalletList) -> bool {
    let sender = tx.owner_address();
    let Some(cost) = tx.total_cost() else {
        return true;
    };
    if ledger.balance(&sender).checked_sub(cost).is_none() {
        return true;
    }
    if let Some(target) = tx.target_address() {
        if tx.quantity > 0 && ledger.balance(&target).checked_add(tx.quantity).is_none() {
            return true;
        }
    }

    let after = ledger.apply_transaction(tx);
    let broken = |addr: &Address| {
        after
            .get_wallet(addr)
            .is_some_and(|w| w.balance < 0 || w.is_empty_and_new())
    };
    if broken(&sender) {
        return true;
    }
    tx.target_address()
        .is_some_and(|target| target != sender && broken(&target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::WalletEntry;
    use crate::consensus::{Winston, WINSTON_PER_AR};
    use crate::crypto::KeyPair;
    use crate::transaction::Tag;

    const DIFF: u32 = 20;
    const HEIGHT: u64 = 10;
    const NOW: u64 = 1_600_000_000;

    fn pre_fork() -> TxValidator {
        TxValidator::new(ProtocolParams {
            fork_height: u64::MAX,
            ..ProtocolParams::default()
        })
    }

    fn post_fork() -> TxValidator {
        TxValidator::new(ProtocolParams {
            fork_height: 0,
            ..ProtocolParams::default()
        })
    }

    fn fee(v: &TxValidator, data: usize, ledger: &WalletList, target: Option<Address>) -> Winston {
        fees::min_fee(data, DIFF, HEIGHT, ledger, target.as_ref(), NOW, v.params())
    }

    fn funded(keypair: &KeyPair, balance: Winston) -> WalletList {
        WalletList::from_entries([WalletEntry::new(keypair.address(), balance)])
    }

    fn transfer(
        v: &TxValidator,
        from: &KeyPair,
        ledger: &WalletList,
        to: Option<Address>,
        quantity: Winston,
        data: &[u8],
    ) -> Transaction {
        let anchor = ledger.last_tx(&from.address()).to_vec();
        let reward = fee(v, data.len(), ledger, to);
        Transaction::new(anchor, to, quantity, data.to_vec(), reward)
            .sign(from)
            .unwrap()
    }

    #[test]
    fn test_valid_transfer_passes() {
        let v = pre_fork();
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);

        let tx = transfer(&v, &alice, &ledger, Some(bob.address()), WINSTON_PER_AR, b"");
        assert_eq!(v.verify(&tx, DIFF, HEIGHT, &ledger, NOW), Ok(()));
        assert!(v.reasons(&tx.id).is_none());
    }

    #[test]
    fn test_stale_ledger_anchor_rejected_after_apply() {
        let v = pre_fork();
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);

        let first = transfer(&v, &alice, &ledger, None, 0, b"one");
        let second = transfer(&v, &alice, &ledger, None, 0, b"two");
        assert!(v.verify(&first, DIFF, HEIGHT, &ledger, NOW).is_ok());

        let next = ledger.apply_transaction(&first);
        let reasons = v.verify(&second, DIFF, HEIGHT, &next, NOW).unwrap_err();
        assert_eq!(reasons, vec![InvalidReason::LastTxNotValid]);
        assert_eq!(v.reasons(&second.id), Some(reasons));
    }

    #[test]
    fn test_post_fork_skips_ledger_anchor_check() {
        let v = post_fork();
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);
        let reward = fee(&v, 0, &ledger, None);
        let tx = Transaction::new(vec![9; 48], None, 0, vec![], reward)
            .sign(&alice)
            .unwrap();
        assert!(v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).is_ok());

        // Same anchor is too large before the fork
        let reasons = pre_fork().verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert!(reasons.contains(&InvalidReason::TxFieldsTooLarge));
        assert!(reasons.contains(&InvalidReason::LastTxNotValid));
    }

    #[test]
    fn test_collects_every_failing_reason() {
        let v = pre_fork();
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10);
        let tx = Transaction::new(vec![1; 32], Some(alice.address()), -5, vec![], 0)
            .with_tags(vec![Tag::new("", "v")])
            .sign(&alice)
            .unwrap();

        let reasons = v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        for expected in [
            InvalidReason::QuantityNegative,
            InvalidReason::SameOwnerAsTarget,
            InvalidReason::TxTooCheap,
            InvalidReason::TagFieldIllegallySpecified,
            InvalidReason::LastTxNotValid,
        ] {
            assert!(reasons.contains(&expected), "missing {}", expected);
        }
        assert!(!reasons.contains(&InvalidReason::TxSignatureNotValid));
    }

    #[test]
    fn test_overspend_and_unfunded_sender() {
        let v = pre_fork();
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let ledger = funded(&alice, WINSTON_PER_AR);

        let tx = transfer(&v, &alice, &ledger, Some(bob.address()), 2 * WINSTON_PER_AR, b"");
        let reasons = v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert_eq!(reasons, vec![InvalidReason::Overspend]);

        let stranger = KeyPair::generate().unwrap();
        let tx = transfer(&v, &stranger, &ledger, None, 0, b"");
        let reasons = v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert!(reasons.contains(&InvalidReason::Overspend));
    }

    #[test]
    fn test_amounts_beyond_winston_range_overspend() {
        let v = post_fork();
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);

        let huge = Transaction::new(vec![1; 48], Some(bob.address()), Winston::MAX, vec![], 1)
            .sign(&alice)
            .unwrap();
        let reasons = v.verify(&huge, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert!(reasons.contains(&InvalidReason::Overspend));
        assert!(reasons.contains(&InvalidReason::TxFieldsTooLarge));

        let negative = Transaction::new(vec![1; 48], Some(bob.address()), Winston::MIN, vec![], -1)
            .sign(&alice)
            .unwrap();
        let reasons = v.verify(&negative, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert!(reasons.contains(&InvalidReason::QuantityNegative));
        assert!(reasons.contains(&InvalidReason::Overspend));

        assert!(!v.verify_batch(&[huge, negative], DIFF, HEIGHT, &ledger, NOW));
    }

    #[test]
    fn test_tampered_fields_fail_signature() {
        let v = pre_fork();
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);
        let mut tx = transfer(&v, &alice, &ledger, None, 0, b"original");
        tx.data = b"tampered".to_vec();

        let reasons = v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert_eq!(reasons, vec![InvalidReason::TxSignatureNotValid]);
    }

    #[test]
    fn test_id_must_hash_signature() {
        let v = pre_fork();
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);
        let mut tx = transfer(&v, &alice, &ledger, None, 0, b"");
        tx.id = TxId([0xAB; 32]);
        let reasons = v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert_eq!(reasons, vec![InvalidReason::TxIdNotValid]);
    }

    #[test]
    fn test_oversized_data_rejected() {
        let v = TxValidator::new(ProtocolParams {
            fork_height: u64::MAX,
            tx_data_size_limit: 16,
            ..ProtocolParams::default()
        });
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);
        let tx = transfer(&v, &alice, &ledger, None, 0, &[0u8; 17]);
        let reasons = v.verify(&tx, DIFF, HEIGHT, &ledger, NOW).unwrap_err();
        assert_eq!(reasons, vec![InvalidReason::TxFieldsTooLarge]);
    }

    #[test]
    fn test_batch_threads_ledger_through() {
        let v = post_fork();
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 3 * WINSTON_PER_AR);
        let reward = fee(&v, 0, &ledger, Some(bob.address()));

        let spend = |n: u8| {
            Transaction::new(vec![n; 48], Some(bob.address()), 2 * WINSTON_PER_AR, vec![], reward)
                .sign(&alice)
                .unwrap()
        };
        let one = spend(1);
        let two = spend(2);

        assert!(v.verify_batch(std::slice::from_ref(&one), DIFF, HEIGHT, &ledger, NOW));
        assert!(v.verify(&two, DIFF, HEIGHT, &ledger, NOW).is_ok());
        // Each is fine alone, together they double spend
        assert!(!v.verify_batch(&[one, two], DIFF, HEIGHT, &ledger, NOW));
    }

    #[test]
    fn test_batch_limits() {
        let v = TxValidator::new(ProtocolParams {
            fork_height: 0,
            block_tx_count_limit: 1,
            ..ProtocolParams::default()
        });
        let alice = KeyPair::generate().unwrap();
        let ledger = funded(&alice, 10 * WINSTON_PER_AR);
        let reward = fee(&v, 0, &ledger, None);
        let txs: Vec<_> = (0..2u8)
            .map(|n| {
                Transaction::new(vec![n; 48], None, 0, vec![], reward)
                    .sign(&alice)
                    .unwrap()
            })
            .collect();
        assert!(!v.verify_batch(&txs, DIFF, HEIGHT, &ledger, NOW));
        assert!(v.verify_batch(&txs[..1], DIFF, HEIGHT, &ledger, NOW));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(InvalidReason::TxTooCheap.code(), "tx_too_cheap");
        assert_eq!(
            serde_json::to_value(InvalidReason::TagFieldIllegallySpecified).unwrap(),
            "tag_field_illegally_specified"
        );
    }
}
