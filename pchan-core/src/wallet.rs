use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxOut};
use tracing::*;

use crate::policy::error::{insufficient_funds_error, ChannelError};
use crate::prelude::*;
use crate::util::transaction_utils::{build_transaction, maybe_add_change_output, unsigned_input};

/// An unspent output the wallet can sign for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// Where it is
    pub outpoint: OutPoint,
    /// What it is
    pub txout: TxOut,
}

/// A layer-1 wallet that funds channels
pub trait Wallet {
    /// Select outputs worth at least `amount_sat`
    fn select_funds(&self, amount_sat: u64) -> Result<Vec<Utxo>, ChannelError>;

    /// Where change goes
    fn change_script(&self) -> ScriptBuf;

    /// Sign the inputs of `tx` that spend `utxos`
    fn sign_funding_transaction(
        &self,
        tx: &mut Transaction,
        utxos: &[Utxo],
    ) -> Result<(), ChannelError>;
}

/// Build and sign a transaction paying `capacity_sat` to `funding_script`
/// at output 0, with change after it.
pub fn build_funding_transaction(
    wallet: &dyn Wallet,
    capacity_sat: u64,
    funding_script: ScriptBuf,
    fee_sat: u64,
) -> Result<Transaction, ChannelError> {
    let needed = capacity_sat.checked_add(fee_sat).ok_or_else(|| {
        insufficient_funds_error(format!("{}: capacity overflow", short_function!()))
    })?;
    let utxos = wallet.select_funds(needed)?;
    let input_value_sat: u64 = utxos.iter().map(|u| u.txout.value.to_sat()).sum();
    debug!("funding {} sat from {} utxos worth {}", capacity_sat, utxos.len(), input_value_sat);

    let mut tx = build_transaction(
        utxos.iter().map(|u| unsigned_input(u.outpoint, Sequence::MAX)).collect(),
        vec![TxOut { value: Amount::from_sat(capacity_sat), script_pubkey: funding_script }],
    );
    maybe_add_change_output(&mut tx, input_value_sat, fee_sat, wallet.change_script())?;
    wallet.sign_funding_transaction(&mut tx, &utxos)?;
    Ok(tx)
}
