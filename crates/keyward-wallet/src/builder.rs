//! Transfer builder on top of the coin selector.
//!
//! 1. Reject dust amounts
//! 2. Select confirmed outputs, oldest first
//! 3. Re-select with room for the fee when the first pass leaves too little
//! 4. Retry largest-first when the result is heavier than a relayable
//!    transaction, and give up past the input ceiling
//! 5. Attach change, or fold sub-dust change into the fee

use keyward_core::address::Address;
use keyward_core::constants::{
    BASE_TX_SIZE, CONFIRMATION_COUNT, DEFAULT_FEE_RATE, DUST_AMOUNT, MASS_PER_INPUT,
    MAX_ORPHAN_TX_MASS, MAX_UTXO_SIZE, output_mass,
};
use keyward_core::types::{Transaction, TxInput, TxOutput, UnspentOutput};

use crate::coin_selection::{Selection, SortPriority, UtxoSelector};
use crate::error::WalletError;

const P2PK_SCRIPT_LEN: u64 = 34;

/// Mass of a pay-to-pubkey transaction with this shape once signed.
fn estimate_mass(inputs: usize, outputs: usize) -> u64 {
    BASE_TX_SIZE
        + MASS_PER_INPUT * inputs as u64
        + output_mass(P2PK_SCRIPT_LEN) * outputs as u64
}

/// An unsigned transfer together with everything a keyring needs to sign
/// and verify it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// The transaction with empty signature scripts.
    pub tx: Transaction,
    /// Outputs consumed by each input, in input order.
    pub spent: Vec<UnspentOutput>,
    /// Address whose key must sign every input.
    pub signer: Address,
    /// Fee in sompi.
    pub fee: u64,
    /// Mass of the signed transaction.
    pub mass: u64,
    /// Whether the whole confirmed balance is being sent.
    pub has_max_send: bool,
}

impl UnsignedTransaction {
    /// Spent outputs in the form the sighash commits to.
    pub fn spent_outputs(&self) -> Vec<TxOutput> {
        self.spent.iter().map(UnspentOutput::as_output).collect()
    }
}

/// Builder for single-recipient transfers.
///
/// # Example
/// ```ignore
/// let unsigned = TransactionBuilder::new(from)
///     .fee_rate(2)
///     .build(&utxos, chain_score, &to, 5 * SOMPI_PER_KAS)?;
/// ```
#[derive(Clone, Debug)]
pub struct TransactionBuilder {
    from: Address,
    fee_rate: u64,
    confirmation_count: u64,
}

impl TransactionBuilder {
    /// Builder spending outputs owned by `from`, sending change back to it.
    pub fn new(from: Address) -> Self {
        Self {
            from,
            fee_rate: DEFAULT_FEE_RATE,
            confirmation_count: CONFIRMATION_COUNT,
        }
    }

    /// Fee per unit of mass (default: [`DEFAULT_FEE_RATE`]).
    pub fn fee_rate(mut self, fee_rate: u64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Minimum confirmation depth (default: [`CONFIRMATION_COUNT`]).
    pub fn confirmation_count(mut self, count: u64) -> Self {
        self.confirmation_count = count;
        self
    }

    /// Build an unsigned transfer of `amount` sompi to `to`.
    pub fn build(
        &self,
        utxos: &[UnspentOutput],
        chain_score: u64,
        to: &Address,
        amount: u64,
    ) -> Result<UnsignedTransaction, WalletError> {
        if amount < DUST_AMOUNT {
            return Err(WalletError::InvalidAmount("amount is too small".into()));
        }

        let first = self.build_with(utxos, chain_score, to, amount, SortPriority::DaaScore)?;
        if first.mass <= MAX_ORPHAN_TX_MASS {
            return Ok(first);
        }

        tracing::debug!(mass = first.mass, inputs = first.spent.len(), "transfer too heavy, retrying largest-first");
        let retry = self.build_with(utxos, chain_score, to, amount, SortPriority::Satoshis)?;
        if retry.spent.len() > MAX_UTXO_SIZE || retry.mass > MAX_ORPHAN_TX_MASS {
            let largest = UtxoSelector::spendable(utxos, chain_score, self.confirmation_count, SortPriority::Satoshis);
            let max_sendable = largest
                .iter()
                .take(MAX_UTXO_SIZE)
                .try_fold(0u64, |acc, u| acc.checked_add(u.satoshis))
                .ok_or(WalletError::AmountOverflow)?;
            return Err(WalletError::UtxoLimitExceeded { max_sendable });
        }
        Ok(retry)
    }

    fn select(
        &self,
        utxos: &[UnspentOutput],
        chain_score: u64,
        target: u64,
        priority: SortPriority,
    ) -> Result<Selection, WalletError> {
        UtxoSelector::select(utxos, target, chain_score, self.confirmation_count, priority)
    }

    fn fee_for(&self, mass: u64) -> Result<u64, WalletError> {
        mass.checked_mul(self.fee_rate).ok_or(WalletError::AmountOverflow)
    }

    fn build_with(
        &self,
        utxos: &[UnspentOutput],
        chain_score: u64,
        to: &Address,
        amount: u64,
        priority: SortPriority,
    ) -> Result<UnsignedTransaction, WalletError> {
        let mut selection = self.select(utxos, chain_score, amount, priority)?;
        let confirmed = UtxoSelector::spendable(utxos, chain_score, self.confirmation_count, priority).len();

        let has_max_send = selection.utxos.len() == confirmed && selection.total_value <= amount;

        let headroom = amount.checked_add(DUST_AMOUNT).ok_or(WalletError::AmountOverflow)?;
        if !has_max_send && selection.total_value <= headroom {
            let fee = self.fee_for(selection.mass)?;
            let target = headroom.checked_add(fee).ok_or(WalletError::AmountOverflow)?;
            selection = self.select(utxos, chain_score, target, priority)?;
        }

        // Each extra input raises the fee; grow until the fee without change
        // is covered. The selector fails once the confirmed set runs out.
        while !has_max_send {
            let n = selection.utxos.len();
            let bare_fee = self.fee_for(estimate_mass(n, 1))?;
            if u128::from(selection.total_value) >= u128::from(amount) + u128::from(bare_fee) {
                break;
            }
            let fee = self.fee_for(estimate_mass(n, 2))?;
            let target = headroom.checked_add(fee).ok_or(WalletError::AmountOverflow)?;
            selection = self.select(utxos, chain_score, target, priority)?;
        }

        let inputs: Vec<TxInput> = selection
            .utxos
            .iter()
            .map(|u| TxInput::unsigned(u.outpoint()))
            .collect();
        let total = selection.total_value;
        let spent = selection.utxos;

        if has_max_send {
            let mut tx = Transaction::new(inputs, vec![self.output(to, 0)]);
            let mass = tx.mass();
            let fee = self.fee_for(mass)?;
            let send = total.checked_sub(fee).filter(|s| *s >= DUST_AMOUNT).ok_or_else(|| {
                WalletError::InvalidAmount("amount is too small".into())
            })?;
            tx.outputs[0].amount = send;
            tracing::info!(inputs = spent.len(), send, fee, "max-send transfer built");
            return Ok(self.finish(tx, spent, fee, mass, true));
        }

        // With change first; drop it when it would be dust.
        let mut tx = Transaction::new(inputs, vec![self.output(to, amount), self.output(&self.from, 0)]);
        let fee = self.fee_for(tx.mass())?;
        let change = total
            .checked_sub(amount)
            .and_then(|rest| rest.checked_sub(fee))
            .unwrap_or(0);
        if change >= DUST_AMOUNT {
            tx.outputs[1].amount = change;
            let mass = tx.mass();
            tracing::info!(inputs = spent.len(), amount, fee, change, "transfer built");
            return Ok(self.finish(tx, spent, fee, mass, false));
        }

        tx.outputs.truncate(1);
        let mass = tx.mass();
        let fee = total - amount;
        tracing::info!(inputs = spent.len(), amount, fee, "transfer built without change");
        Ok(self.finish(tx, spent, fee, mass, false))
    }

    fn output(&self, to: &Address, amount: u64) -> TxOutput {
        TxOutput {
            amount,
            script_public_key: to.script_public_key(),
        }
    }

    fn finish(
        &self,
        tx: Transaction,
        spent: Vec<UnspentOutput>,
        fee: u64,
        mass: u64,
        has_max_send: bool,
    ) -> UnsignedTransaction {
        UnsignedTransaction {
            tx,
            spent,
            signer: self.from.clone(),
            fee,
            mass,
            has_max_send,
        }
    }
}
