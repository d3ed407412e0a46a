//! Confirmation-aware UTXO selection.
//!
//! Filters outputs to those buried at least `confirmation_count` scores
//! deep, orders them deterministically and accumulates greedily until the
//! target is covered. Oldest outputs go first by default so fresh change is
//! left alone; the satoshi-first order is used to keep large transfers
//! under the mass limit.
//!
//! Selection is a pure function of its inputs: no I/O and no mutation.

use std::cmp::Ordering;

use keyward_core::constants::{MASS_PER_INPUT, MAX_SOMPI};
use keyward_core::types::UnspentOutput;

use crate::error::WalletError;

/// Order in which confirmed outputs are spent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortPriority {
    /// Oldest first, larger first among equals.
    #[default]
    DaaScore,
    /// Largest first, older first among equals.
    Satoshis,
}

impl SortPriority {
    fn compare(self, a: &UnspentOutput, b: &UnspentOutput) -> Ordering {
        let primary = match self {
            SortPriority::DaaScore => a
                .block_daa_score
                .cmp(&b.block_daa_score)
                .then(b.satoshis.cmp(&a.satoshis)),
            SortPriority::Satoshis => b
                .satoshis
                .cmp(&a.satoshis)
                .then(a.block_daa_score.cmp(&b.block_daa_score)),
        };
        primary.then(a.txid.cmp(&b.txid)).then(a.vout.cmp(&b.vout))
    }
}

/// Outputs chosen to fund a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// `txid:vout` of every selected output, in selection order.
    pub utxo_ids: Vec<String>,
    pub utxos: Vec<UnspentOutput>,
    /// Sum of selected values in sompi.
    pub total_value: u64,
    /// Mass contributed by the selected inputs.
    pub mass: u64,
}

/// Deterministic greedy selector.
pub struct UtxoSelector;

impl UtxoSelector {
    /// Confirmed outputs in spend order.
    pub fn spendable(
        utxos: &[UnspentOutput],
        chain_score: u64,
        confirmation_count: u64,
        priority: SortPriority,
    ) -> Vec<&UnspentOutput> {
        let mut confirmed: Vec<&UnspentOutput> = utxos
            .iter()
            .filter(|u| u.is_confirmed(chain_score, confirmation_count))
            .collect();
        confirmed.sort_by(|a, b| priority.compare(a, b));
        confirmed
    }

    /// Sum of confirmed values, failing past [`MAX_SOMPI`].
    pub fn confirmed_total(
        utxos: &[UnspentOutput],
        chain_score: u64,
        confirmation_count: u64,
    ) -> Result<u64, WalletError> {
        let total: u128 = utxos
            .iter()
            .filter(|u| u.is_confirmed(chain_score, confirmation_count))
            .map(|u| u128::from(u.satoshis))
            .sum();
        u64::try_from(total)
            .ok()
            .filter(|t| *t <= MAX_SOMPI)
            .ok_or(WalletError::AmountOverflow)
    }

    /// Select confirmed outputs until their total reaches `target`.
    ///
    /// # Arguments
    /// - `utxos`: candidate outputs, in any order
    /// - `target`: amount to cover in sompi
    /// - `chain_score`: current virtual DAA score
    /// - `confirmation_count`: minimum depth for an output to be spendable
    /// - `priority`: spend order
    pub fn select(
        utxos: &[UnspentOutput],
        target: u64,
        chain_score: u64,
        confirmation_count: u64,
        priority: SortPriority,
    ) -> Result<Selection, WalletError> {
        if target == 0 {
            return Err(WalletError::InvalidAmount("target must be non-zero".into()));
        }

        let ordered = Self::spendable(utxos, chain_score, confirmation_count, priority);

        let mut selected = Vec::new();
        let mut total: u128 = 0;
        let mut mass: u64 = 0;

        for utxo in ordered {
            total += u128::from(utxo.satoshis);
            if total > u128::from(MAX_SOMPI) {
                return Err(WalletError::AmountOverflow);
            }
            mass = mass.saturating_add(MASS_PER_INPUT);
            selected.push(utxo.clone());

            if total >= u128::from(target) {
                let total_value = u64::try_from(total).map_err(|_| WalletError::AmountOverflow)?;
                tracing::debug!(
                    inputs = selected.len(),
                    total = total_value,
                    target,
                    ?priority,
                    "utxos selected"
                );
                return Ok(Selection {
                    utxo_ids: selected.iter().map(UnspentOutput::id).collect(),
                    utxos: selected,
                    total_value,
                    mass,
                });
            }
        }

        Err(WalletError::InsufficientFunds {
            have: u64::try_from(total).map_err(|_| WalletError::AmountOverflow)?,
            need: target,
        })
    }
}
