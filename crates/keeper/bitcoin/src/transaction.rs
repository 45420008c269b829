//! Withdrawal transactions as partially signed bitcoin transactions.
//!
//! A withdrawal consolidates every unspent main output of a safe and every unspent fee output of
//! its accountant into one transaction:
//!
//! ```text
//!   inputs:   main_0 .. main_n, fee_0 .. fee_m          sequence 0xffffffff
//!   outputs:  payment                                   to the receiver
//!             main change                               to the safe, if not dust
//!             fee change                                to the accountant, if not dust
//!             OP_RETURN <memo>
//! ```

use core::str::FromStr;

use bitcoin::{
    Address, Amount, EcdsaSighashType, OutPoint, Psbt, PublicKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness, absolute::LockTime, ecdsa, hashes::Hash,
    psbt::PsbtSighashType, script::PushBytesBuf, secp256k1, sighash::SighashCache,
    transaction::Version,
};

use crate::{BitcoinError, DUST_SATOSHI, MIN_FEE_RATE, Result};

/// An output the keeper can spend.
#[derive(Debug, Clone)]
pub struct SpendableOutput {
    /// The hash of the transaction holding the output, in display order.
    pub transaction_hash: String,
    /// The output index.
    pub index: u32,
    /// The value in satoshi.
    pub satoshi: u64,
    /// The witness script for main outputs, the P2WPKH script pubkey for fee outputs.
    pub script: ScriptBuf,
}

/// A freshly built withdrawal.
#[derive(Debug, Clone)]
pub struct ProposedTransaction {
    /// The partially signed transaction, without signatures.
    pub psbt: Psbt,
    /// The transaction id.
    pub txid: Txid,
    /// The network fee in satoshi.
    pub fee: u64,
    /// The number of main inputs, they come first.
    pub main_inputs: usize,
}

/// Estimates the fee of a withdrawal with `inputs` inputs and an `OP_RETURN` memo.
///
/// Each input is priced at the worst case witness of the multisig script.
///
/// # Errors
///
/// Returns [`BitcoinError::FeeOverflow`] if the fee does not fit in a `u64`.
pub fn estimate_fee(inputs: usize, memo_len: usize, fee_rate: u64) -> Result<u64> {
    let fee_rate = fee_rate.max(MIN_FEE_RATE);

    (inputs as u64)
        .checked_mul(300)
        .and_then(|weight| weight.checked_add(40 + 3 * 128))
        .map(|weight| weight / 4)
        .and_then(|vsize| vsize.checked_add(memo_len as u64))
        .and_then(|vsize| vsize.checked_mul(fee_rate))
        .ok_or(BitcoinError::FeeOverflow { inputs, fee_rate })
}

/// Builds an unsigned withdrawal paying `amount` satoshi to `receiver`.
///
/// # Errors
///
/// Returns an error if the payment is dust, if the main inputs do not cover the payment or the
/// fee inputs do not cover the fee, or if an input hash or the memo are malformed.
#[bon::builder]
pub fn build_transaction(
    main_inputs: &[SpendableOutput],
    fee_inputs: &[SpendableOutput],
    receiver: &Address,
    amount: u64,
    safe_address: &Address,
    accountant_address: &Address,
    fee_rate: u64,
    memo: &[u8],
) -> Result<ProposedTransaction> {
    if amount < DUST_SATOSHI {
        return Err(BitcoinError::other(format!("payment {amount} below dust")));
    }

    let main_total = main_inputs.iter().map(|input| input.satoshi).sum::<u64>();
    let fee_total = fee_inputs.iter().map(|input| input.satoshi).sum::<u64>();
    let fee = estimate_fee(main_inputs.len() + fee_inputs.len(), memo.len(), fee_rate)?;

    if main_total < amount {
        return Err(BitcoinError::InsufficientInputs(
            format!("main inputs {main_total} below payment {amount}").into(),
        ));
    }
    if fee_total < fee {
        return Err(BitcoinError::InsufficientInputs(
            format!("fee inputs {fee_total} below fee {fee}").into(),
        ));
    }

    let input = main_inputs
        .iter()
        .chain(fee_inputs)
        .map(|input| {
            let txid = Txid::from_str(&input.transaction_hash).map_err(|err| {
                BitcoinError::other(format!("input {}: {err}", input.transaction_hash))
            })?;

            Ok(TxIn {
                previous_output: OutPoint::new(txid, input.index),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut output = vec![TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: receiver.script_pubkey(),
    }];

    let main_change = main_total - amount;
    if main_change >= DUST_SATOSHI {
        output.push(TxOut {
            value: Amount::from_sat(main_change),
            script_pubkey: safe_address.script_pubkey(),
        });
    }

    let fee_change = fee_total - fee;
    if fee_change >= DUST_SATOSHI {
        output.push(TxOut {
            value: Amount::from_sat(fee_change),
            script_pubkey: accountant_address.script_pubkey(),
        });
    }

    let memo = PushBytesBuf::try_from(memo.to_vec())
        .map_err(|err| BitcoinError::other(format!("memo: {err}")))?;
    output.push(TxOut { value: Amount::ZERO, script_pubkey: ScriptBuf::new_op_return(&memo) });

    let unsigned_tx =
        Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input, output };
    let txid = unsigned_tx.compute_txid();

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)?;
    let sighash_type = Some(PsbtSighashType::from(EcdsaSighashType::All));

    for (psbt_input, main) in psbt.inputs.iter_mut().zip(main_inputs) {
        psbt_input.witness_utxo = Some(TxOut {
            value: Amount::from_sat(main.satoshi),
            script_pubkey: ScriptBuf::new_p2wsh(&main.script.wscript_hash()),
        });
        psbt_input.witness_script = Some(main.script.clone());
        psbt_input.sighash_type = sighash_type;
    }

    for (psbt_input, fee) in psbt.inputs.iter_mut().skip(main_inputs.len()).zip(fee_inputs) {
        psbt_input.witness_utxo =
            Some(TxOut { value: Amount::from_sat(fee.satoshi), script_pubkey: fee.script.clone() });
        psbt_input.sighash_type = sighash_type;
    }

    Ok(ProposedTransaction { psbt, txid, fee, main_inputs: main_inputs.len() })
}

/// Computes the SIGHASH_ALL segwit digest of input `index`.
///
/// Inputs with a witness script are hashed as P2WSH, others as P2WPKH.
///
/// # Errors
///
/// Returns an error if the input does not exist or lacks its witness output.
pub fn input_sighash(psbt: &Psbt, index: usize) -> Result<[u8; 32]> {
    let input = psbt
        .inputs
        .get(index)
        .ok_or_else(|| BitcoinError::Sighash(format!("input {index} out of range").into()))?;
    let utxo = input
        .witness_utxo
        .as_ref()
        .ok_or_else(|| BitcoinError::Sighash(format!("input {index} without utxo").into()))?;

    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let sighash = match &input.witness_script {
        Some(script) => {
            cache.p2wsh_signature_hash(index, script, utxo.value, EcdsaSighashType::All)?
        }
        None => cache.p2wpkh_signature_hash(
            index,
            &utxo.script_pubkey,
            utxo.value,
            EcdsaSighashType::All,
        )?,
    };

    Ok(sighash.to_byte_array())
}

/// Records a DER encoded SIGHASH_ALL signature of `public_key` on input `index`.
///
/// # Errors
///
/// Returns an error if the input does not exist or the signature is malformed.
pub fn add_partial_signature(
    psbt: &mut Psbt,
    index: usize,
    public_key: PublicKey,
    signature: &[u8],
) -> Result<()> {
    let mut signature = secp256k1::ecdsa::Signature::from_der(signature)?;
    signature.normalize_s();

    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or_else(|| BitcoinError::other(format!("input {index} out of range")))?;
    input
        .partial_sigs
        .insert(public_key, ecdsa::Signature { signature, sighash_type: EcdsaSighashType::All });

    Ok(())
}

/// Returns the outpoints spent by `psbt`, as display order hashes and indexes.
pub fn spent_outpoints(psbt: &Psbt) -> Vec<(String, u32)> {
    psbt.unsigned_tx
        .input
        .iter()
        .map(|input| (input.previous_output.txid.to_string(), input.previous_output.vout))
        .collect()
}

/// Serializes a partially signed transaction.
pub fn serialize_psbt(psbt: &Psbt) -> Vec<u8> {
    psbt.serialize()
}

/// Deserializes a partially signed transaction.
///
/// # Errors
///
/// Returns an error if the bytes are not a valid PSBT.
pub fn deserialize_psbt(bz: &[u8]) -> Result<Psbt> {
    Ok(Psbt::deserialize(bz)?)
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use bitcoin::{Network, secp256k1::Secp256k1};

    use super::*;
    use crate::{
        account::{build_witness_key_account, build_witness_script_account, parse_address},
        signature::verify_signature,
    };

    const HOLDER: &str = "023cd0e5c08c30ae0e059ca1e27d894e609860ff6e0846637282899921b4f9b0f8";
    const SIGNER: &str = "02bf0a7fa4b7905a0de5ab60a5322529e1a591ddd1ee53df82e751e8adb4bed08c";
    const OBSERVER: &str = "028b38d2b60ab1e2391b8a469805a432dd60f7aa63c063311ce2246a78d000e514";
    const ACCOUNTANT_PRIVATE: &str =
        "743602ca7e2723e7dd510e611957cfdcbb517dff0c5b1877472e35b0f19e0063";
    const RECEIVER: &str = "bc1ql0up0wwazxt6xlj84u9fnvhnagjjetcn7h4z5xxvd0kf5xuczjgqq2aehc";
    const MEMO: &str = "3e37ea1c1455400d9642f6bbcd8c744e";

    fn accountant_public() -> String {
        let key = secp256k1::SecretKey::from_slice(&hex::decode(ACCOUNTANT_PRIVATE).unwrap())
            .unwrap();
        key.public_key(&Secp256k1::new()).to_string()
    }

    fn proposal(amount: u64) -> Result<ProposedTransaction> {
        let safe = build_witness_script_account(
            HOLDER,
            SIGNER,
            OBSERVER,
            Duration::from_secs(3600),
            Network::Bitcoin,
        )
        .unwrap();
        let accountant = build_witness_key_account(&accountant_public(), Network::Bitcoin).unwrap();
        let receiver = parse_address(RECEIVER, Network::Bitcoin).unwrap();

        let main = |hash: &str, index, satoshi| SpendableOutput {
            transaction_hash: hash.into(),
            index,
            satoshi,
            script: safe.script.clone(),
        };
        let fee = |hash: &str, index, satoshi| SpendableOutput {
            transaction_hash: hash.into(),
            index,
            satoshi,
            script: accountant.script.clone(),
        };

        build_transaction()
            .main_inputs(&[
                main("f04f905bb7d8e5ae1d7cd19eac8be5814380ff3fee0c4782ecb9f76dcad1e4a8", 1, 15060),
                main("afa34dd32333cc9d92f0deee82f8a84dfbb6db5be35bf37155189e35850d408e", 0, 10000),
            ])
            .fee_inputs(&[
                fee("f04f905bb7d8e5ae1d7cd19eac8be5814380ff3fee0c4782ecb9f76dcad1e4a8", 2, 21720),
                fee("e2dd1c093457be75ba1af183c66fcfbdb042dfa91ead0d7bf3715029b756e282", 0, 10000),
            ])
            .receiver(&receiver)
            .amount(amount)
            .safe_address(&safe.address)
            .accountant_address(&accountant.address)
            .fee_rate(10)
            .memo(&hex::decode(MEMO).unwrap())
            .call()
    }

    #[test]
    fn fee_is_priced_per_input_with_a_floor() {
        assert_eq!(estimate_fee(4, 16, 10).unwrap(), 4220);
        assert_eq!(estimate_fee(4, 16, 1).unwrap(), 4220);
        assert_eq!(estimate_fee(4, 16, 20).unwrap(), 8440);
        assert_eq!(estimate_fee(1, 16, 10).unwrap(), (40 + 300 + 384) / 4 * 10 + 160);
        assert!(matches!(
            estimate_fee(4, 16, 1 << 60),
            Err(BitcoinError::FeeOverflow { inputs: 4, .. })
        ));
    }

    #[test]
    fn withdrawal_outputs_are_payment_change_fee_change_and_memo() {
        let proposed = proposal(12300).unwrap();
        let tx = &proposed.psbt.unsigned_tx;

        assert_eq!(proposed.fee, 4220);
        assert_eq!(proposed.main_inputs, 2);
        assert_eq!(tx.input.len(), 4);
        assert!(tx.input.iter().all(|input| input.sequence == Sequence::MAX));

        let values = tx.output.iter().map(|output| output.value.to_sat()).collect::<Vec<_>>();
        assert_eq!(values, vec![12300, 12760, 27500, 0]);
        assert!(tx.output[3].script_pubkey.is_op_return());
        assert_eq!(
            proposed.txid.to_string(),
            "27c2c4276045678fa1f35d5506d4573d99cf1dcfe8552dae05bcb829006757c9"
        );

        assert_eq!(spent_outpoints(&proposed.psbt)[2], (
            "f04f905bb7d8e5ae1d7cd19eac8be5814380ff3fee0c4782ecb9f76dcad1e4a8".to_string(),
            2
        ));
    }

    #[test]
    fn dust_change_is_left_to_the_miners() {
        let proposed = proposal(24500).unwrap();
        let values = proposed
            .psbt
            .unsigned_tx
            .output
            .iter()
            .map(|output| output.value.to_sat())
            .collect::<Vec<_>>();

        assert_eq!(values, vec![24500, 27500, 0]);
    }

    #[test]
    fn payment_must_be_covered_by_main_inputs() {
        assert!(matches!(proposal(25061), Err(BitcoinError::InsufficientInputs(_))));
        assert!(proposal(999).is_err());
    }

    #[test]
    fn partial_signatures_are_recorded_per_input() {
        let proposed = proposal(12300).unwrap();
        let mut psbt = deserialize_psbt(&serialize_psbt(&proposed.psbt)).unwrap();

        let secp = Secp256k1::new();
        let key = secp256k1::SecretKey::from_slice(&hex::decode(ACCOUNTANT_PRIVATE).unwrap())
            .unwrap();
        let public = PublicKey::new(key.public_key(&secp));

        let digest = input_sighash(&psbt, 2).unwrap();
        assert_ne!(digest, input_sighash(&psbt, 0).unwrap());

        let signature = secp
            .sign_ecdsa(&secp256k1::Message::from_digest(digest), &key)
            .serialize_der()
            .to_vec();
        assert!(verify_signature(&public.to_string(), &digest, &signature).is_ok());

        add_partial_signature(&mut psbt, 2, public, &signature).unwrap();
        assert_eq!(psbt.inputs[2].partial_sigs.len(), 1);
        assert!(psbt.inputs[0].partial_sigs.is_empty());
        assert!(input_sighash(&psbt, 4).is_err());
    }
}
