use crate::core::transaction::sum_amounts;
use crate::core::{HashProvider, Transaction, TransactionItemType, TransactionType};
use crate::error::{BlockchainError, Result};
use crate::utils::ecdsa_p256_sha256_verify;
use std::collections::HashSet;

/// Structure and authorization checks on a single transaction, independent of
/// chain state. The engine runs this first in `check_transaction`.
pub trait TransactionVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction, hasher: &HashProvider) -> Result<()>;
}

fn reject(tx: &Transaction, reason: impl AsRef<str>) -> BlockchainError {
    BlockchainError::TransactionAssertion(format!(
        "Transaction {} is malformed: {}",
        tx.get_id(),
        reason.as_ref()
    ))
}

/// Shape checks only; signatures are not looked at.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralVerifier;

impl TransactionVerifier for StructuralVerifier {
    fn verify(&self, tx: &Transaction, hasher: &HashProvider) -> Result<()> {
        if tx.get_id().is_empty() {
            return Err(BlockchainError::TransactionAssertion(
                "Transaction id is empty".to_string(),
            ));
        }

        let expected = tx.compute_hash(hasher)?;
        if expected != tx.get_hash() {
            return Err(reject(tx, "hash does not match its content"));
        }

        match tx.get_type() {
            TransactionType::Regular if tx.get_inputs().is_empty() => {
                return Err(reject(tx, "regular transaction has no inputs"));
            }
            TransactionType::Fee | TransactionType::Reward if !tx.get_inputs().is_empty() => {
                return Err(reject(
                    tx,
                    format!("{:?} transaction must not spend inputs", tx.get_type()),
                ));
            }
            _ => {}
        }
        if tx.get_outputs().is_empty() {
            return Err(reject(tx, "no outputs"));
        }

        let mut seen = HashSet::new();
        for input in tx.get_inputs() {
            if input.get_type() != TransactionItemType::Input {
                return Err(reject(tx, "output item listed among inputs"));
            }
            if !seen.insert(input.key()) {
                return Err(reject(tx, format!("input {} listed twice", input.key())));
            }
        }

        for (position, output) in tx.get_outputs().iter().enumerate() {
            if output.get_type() != TransactionItemType::Output {
                return Err(reject(tx, "input item listed among outputs"));
            }
            if output.get_transaction_id() != tx.get_id() {
                return Err(reject(
                    tx,
                    format!(
                        "output {position} belongs to {}",
                        output.get_transaction_id()
                    ),
                ));
            }
            if output.get_index() as usize != position {
                return Err(reject(
                    tx,
                    format!(
                        "output at position {position} has index {}",
                        output.get_index()
                    ),
                ));
            }
        }

        for item in tx.items() {
            if i64::try_from(item.get_amount()).is_err() {
                return Err(reject(tx, format!("amount {} is too large", item.get_amount())));
            }
        }
        sum_amounts(tx.get_inputs())?;
        sum_amounts(tx.get_outputs())?;

        Ok(())
    }
}

/// Structural checks plus one ECDSA P-256 signature per input. The input
/// address is the signer's public key; the message is the signing hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl TransactionVerifier for SignatureVerifier {
    fn verify(&self, tx: &Transaction, hasher: &HashProvider) -> Result<()> {
        StructuralVerifier.verify(tx, hasher)?;

        let message = tx.signing_hash(hasher)?;
        for input in tx.get_inputs() {
            let signature = input
                .get_signature()
                .ok_or_else(|| reject(tx, format!("input {} is not signed", input.key())))?;
            if !ecdsa_p256_sha256_verify(input.get_address(), signature, &message) {
                return Err(BlockchainError::TransactionAssertion(format!(
                    "Invalid signature on input {} of transaction {}",
                    input.key(),
                    tx.get_id()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransactionData, TransactionItem};
    use crate::utils::{new_key_pair, public_key_from_pkcs8};

    fn regular(hasher: &HashProvider) -> Transaction {
        Transaction::with_id(
            "T2",
            TransactionType::Regular,
            vec![TransactionItem::input("T1", 0, vec![1; 4], 100)],
            vec![(vec![2; 4], 90)],
            hasher,
        )
        .unwrap()
    }

    #[test]
    fn test_well_formed_transaction_passes() {
        let hasher = HashProvider::default();
        StructuralVerifier.verify(&regular(&hasher), &hasher).unwrap();
    }

    #[test]
    fn test_tampered_hash_is_rejected() {
        let hasher = HashProvider::default();
        let tx = regular(&hasher);
        let forged = Transaction::from_parts(
            tx.get_id().to_string(),
            tx.get_type(),
            vec![0; 32],
            tx.get_data().clone(),
        );
        let err = StructuralVerifier.verify(&forged, &hasher).unwrap_err();
        assert!(matches!(err, BlockchainError::TransactionAssertion(_)));
    }

    #[test]
    fn test_input_rules_per_type() {
        let hasher = HashProvider::default();
        let no_inputs =
            Transaction::with_id("T", TransactionType::Regular, vec![], vec![(vec![1], 1)], &hasher)
                .unwrap();
        assert!(StructuralVerifier.verify(&no_inputs, &hasher).is_err());

        let reward_with_input = Transaction::with_id(
            "R",
            TransactionType::Reward,
            vec![TransactionItem::input("T1", 0, vec![1], 1)],
            vec![(vec![1], 1)],
            &hasher,
        )
        .unwrap();
        assert!(StructuralVerifier.verify(&reward_with_input, &hasher).is_err());

        let fee = Transaction::with_id("F", TransactionType::Fee, vec![], vec![(vec![1], 1)], &hasher)
            .unwrap();
        StructuralVerifier.verify(&fee, &hasher).unwrap();
    }

    #[test]
    fn test_duplicate_input_key_is_rejected() {
        let hasher = HashProvider::default();
        let tx = Transaction::with_id(
            "T2",
            TransactionType::Regular,
            vec![
                TransactionItem::input("T1", 0, vec![1], 10),
                TransactionItem::input("T1", 0, vec![1], 10),
            ],
            vec![(vec![2], 5)],
            &hasher,
        )
        .unwrap();
        assert!(StructuralVerifier.verify(&tx, &hasher).is_err());
    }

    #[test]
    fn test_misnumbered_output_is_rejected() {
        let hasher = HashProvider::default();
        let mut tx = Transaction::from_parts(
            "T2".to_string(),
            TransactionType::Fee,
            vec![],
            TransactionData {
                inputs: vec![],
                outputs: vec![TransactionItem::output("T2", 3, vec![1], 1)],
            },
        );
        tx.refresh_hash(&hasher).unwrap();
        assert!(StructuralVerifier.verify(&tx, &hasher).is_err());
    }

    #[test]
    fn test_signature_verifier() {
        let hasher = HashProvider::default();
        let pkcs8 = new_key_pair().unwrap();
        let owner = public_key_from_pkcs8(&pkcs8).unwrap();

        let mut tx = Transaction::with_id(
            "T2",
            TransactionType::Regular,
            vec![TransactionItem::input("T1", 0, owner, 100)],
            vec![(vec![2; 4], 90)],
            &hasher,
        )
        .unwrap();
        assert!(SignatureVerifier.verify(&tx, &hasher).is_err());

        tx.sign_inputs(&pkcs8, &hasher).unwrap();
        SignatureVerifier.verify(&tx, &hasher).unwrap();
    }

    #[test]
    fn test_signature_from_other_key_is_rejected() {
        let hasher = HashProvider::default();
        let owner_key = new_key_pair().unwrap();
        let thief_key = new_key_pair().unwrap();
        let owner = public_key_from_pkcs8(&owner_key).unwrap();

        let mut tx = Transaction::with_id(
            "T2",
            TransactionType::Regular,
            vec![TransactionItem::input("T1", 0, owner, 100)],
            vec![(vec![2; 4], 90)],
            &hasher,
        )
        .unwrap();
        assert_eq!(tx.sign_inputs(&thief_key, &hasher).unwrap(), 0);

        let message = tx.signing_hash(&hasher).unwrap();
        let mut data = tx.get_data().clone();
        data.inputs[0].set_signature(Some(
            crate::utils::ecdsa_p256_sha256_sign(&thief_key, &message).unwrap(),
        ));
        let mut forged = Transaction::from_parts("T2".to_string(), TransactionType::Regular, vec![], data);
        forged.refresh_hash(&hasher).unwrap();

        let err = SignatureVerifier.verify(&forged, &hasher).unwrap_err();
        assert!(err.to_string().contains("Invalid signature"));
    }
}
