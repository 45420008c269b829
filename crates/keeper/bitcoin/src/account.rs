//! Witness script and witness key accounts of a safe.
//!
//! A safe owns two scripts:
//!
//! ```text
//!   main:  OP_IF
//!            2                                      holder + signer, any time
//!          OP_ELSE
//!            <timelock> OP_CSV OP_DROP
//!            <observer> OP_CHECKSIGVERIFY 1         holder + observer, after the timelock
//!          OP_ENDIF
//!          <holder> <signer> 2 OP_CHECKMULTISIG
//!
//!   fee:   P2WPKH of the accountant key
//! ```

use core::{str::FromStr, time::Duration};

use bitcoin::{
    Address, CompressedPublicKey, Network, PublicKey, ScriptBuf, Sequence,
    opcodes::all::{
        OP_CHECKMULTISIG, OP_CHECKSIGVERIFY, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_IF,
        OP_PUSHNUM_1, OP_PUSHNUM_2,
    },
    script::{Builder, Instruction},
    secp256k1,
};

use crate::{BitcoinError, MAX_SEQUENCE, Result};

/// The main multisig account of a safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessScriptAccount {
    /// The witness script.
    pub script: ScriptBuf,
    /// The P2WSH address of `script`.
    pub address: Address,
    /// The sequence of the recovery path.
    pub sequence: Sequence,
}

/// The single key fee paying account of a safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessKeyAccount {
    /// The P2WPKH script pubkey.
    pub script: ScriptBuf,
    /// The P2WPKH address.
    pub address: Address,
    /// The sequence inputs of this account are spent with.
    pub sequence: Sequence,
}

/// Derives the main account of a safe from its keys and recovery timelock.
///
/// The timelock is rounded down to whole 512 second intervals.
///
/// # Errors
///
/// Returns an error if a key is not a hex encoded compressed public key, or the timelock does
/// not fit a relative lock.
pub fn build_witness_script_account(
    holder: &str,
    signer: &str,
    observer: &str,
    timelock: Duration,
    network: Network,
) -> Result<WitnessScriptAccount> {
    let holder = parse_public_key(holder)?;
    let signer = parse_public_key(signer)?;
    let observer = parse_public_key(observer)?;

    let intervals = u16::try_from(timelock.as_secs() / 512)
        .map_err(|_| BitcoinError::other(format!("timelock too long: {timelock:?}")))?;
    if intervals == 0 {
        return Err(BitcoinError::other(format!("timelock too short: {timelock:?}")));
    }
    let sequence = Sequence::from_512_second_intervals(intervals);

    let script = Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_ELSE)
        .push_sequence(sequence)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(&observer)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_opcode(OP_PUSHNUM_1)
        .push_opcode(OP_ENDIF)
        .push_key(&holder)
        .push_key(&signer)
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script();

    let address = Address::p2wsh(&script, network);

    Ok(WitnessScriptAccount { script, address, sequence })
}

/// Derives the fee paying account of an accountant key.
///
/// # Errors
///
/// Returns an error if the key is not a hex encoded compressed public key.
pub fn build_witness_key_account(accountant: &str, network: Network) -> Result<WitnessKeyAccount> {
    let accountant = CompressedPublicKey(parse_public_key(accountant)?.inner);
    let address = Address::p2wpkh(&accountant, network);

    Ok(WitnessKeyAccount {
        script: address.script_pubkey(),
        address,
        sequence: Sequence(MAX_SEQUENCE),
    })
}

/// Returns whether `script` spends with the holder and signer keys on its immediate path.
pub fn is_multisig_holder_signer_script(script: &[u8]) -> bool {
    let script = ScriptBuf::from_bytes(script.to_vec());
    let instructions = script.instructions().collect::<core::result::Result<Vec<_>, _>>();

    let Ok(instructions) = instructions else {
        return false;
    };

    match instructions.as_slice() {
        [
            Instruction::Op(OP_IF),
            Instruction::Op(OP_PUSHNUM_2),
            Instruction::Op(OP_ELSE),
            Instruction::PushBytes(_),
            Instruction::Op(OP_CSV),
            Instruction::Op(OP_DROP),
            Instruction::PushBytes(observer),
            Instruction::Op(OP_CHECKSIGVERIFY),
            Instruction::Op(OP_PUSHNUM_1),
            Instruction::Op(OP_ENDIF),
            Instruction::PushBytes(holder),
            Instruction::PushBytes(signer),
            Instruction::Op(OP_PUSHNUM_2),
            Instruction::Op(OP_CHECKMULTISIG),
        ] => [observer, holder, signer].iter().all(|key| key.len() == 33),
        _ => false,
    }
}

/// Parses an address and checks it belongs to `network`.
///
/// # Errors
///
/// Returns an error if the address does not parse or belongs to another network.
pub fn parse_address(address: &str, network: Network) -> Result<Address> {
    Ok(Address::from_str(address)?.require_network(network)?)
}

/// Parses a hex encoded compressed public key.
///
/// # Errors
///
/// Returns an error if the key is not hex or not a compressed secp256k1 key.
pub fn parse_public_key(public_key: &str) -> Result<PublicKey> {
    let bz = hex::decode(public_key)
        .map_err(|err| BitcoinError::PublicKey(format!("{public_key}: {err}").into()))?;
    if bz.len() != 33 {
        return Err(BitcoinError::PublicKey(format!("{public_key}: not compressed").into()));
    }

    let key = secp256k1::PublicKey::from_slice(&bz)
        .map_err(|err| BitcoinError::PublicKey(format!("{public_key}: {err}").into()))?;

    Ok(PublicKey::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLDER: &str =
        "023cd0e5c08c30ae0e059ca1e27d894e609860ff6e0846637282899921b4f9b0f8";
    const SIGNER: &str =
        "02bf0a7fa4b7905a0de5ab60a5322529e1a591ddd1ee53df82e751e8adb4bed08c";
    const OBSERVER: &str =
        "028b38d2b60ab1e2391b8a469805a432dd60f7aa63c063311ce2246a78d000e514";

    #[test]
    fn witness_script_account_is_derived_from_the_keys() {
        let account = build_witness_script_account(
            HOLDER,
            SIGNER,
            OBSERVER,
            Duration::from_secs(3600),
            Network::Bitcoin,
        )
        .unwrap();

        assert_eq!(
            hex::encode(account.script.as_bytes()),
            "635267030700\
             40b27521028b38d2b60ab1e2391b8a469805a432dd60f7aa63c063311ce2246a78d000e514ad516821\
             023cd0e5c08c30ae0e059ca1e27d894e609860ff6e0846637282899921b4f9b0f821\
             02bf0a7fa4b7905a0de5ab60a5322529e1a591ddd1ee53df82e751e8adb4bed08c52ae"
        );
        assert_eq!(
            account.address.to_string(),
            "bc1q7erq8pvv665nuzmrqrn5vyc3kcd8v4vtafvdd8mkt9h05qz57l3qks2lsd"
        );
        assert_eq!(account.sequence.to_consensus_u32(), 0x0040_0007);
        assert!(is_multisig_holder_signer_script(account.script.as_bytes()));
    }

    #[test]
    fn witness_script_account_rejects_bad_inputs() {
        let uncompressed = format!("04{}", &HOLDER[2..]);
        assert!(matches!(
            build_witness_script_account(
                &uncompressed,
                SIGNER,
                OBSERVER,
                Duration::from_secs(3600),
                Network::Bitcoin,
            ),
            Err(BitcoinError::PublicKey(_))
        ));

        assert!(
            build_witness_script_account(
                HOLDER,
                SIGNER,
                OBSERVER,
                Duration::from_secs(100),
                Network::Bitcoin,
            )
            .is_err()
        );
    }

    #[test]
    fn witness_key_account_pays_to_the_accountant_key() {
        let accountant = bitcoin::PrivateKey::from_slice(
            &hex::decode("743602ca7e2723e7dd510e611957cfdcbb517dff0c5b1877472e35b0f19e0063")
                .unwrap(),
            Network::Bitcoin,
        )
        .unwrap();
        let secp = secp256k1::Secp256k1::new();
        let public = accountant.public_key(&secp).to_string();

        let account = build_witness_key_account(&public, Network::Bitcoin).unwrap();
        assert_eq!(account.address.to_string(), "bc1qkczcrtknyhs228xg9nvujjvs96x56cf9l4q9za");
        assert_eq!(account.sequence, Sequence::MAX);
        assert!(!is_multisig_holder_signer_script(account.script.as_bytes()));
    }

    #[test]
    fn addresses_are_checked_against_the_network() {
        let receiver = "bc1ql0up0wwazxt6xlj84u9fnvhnagjjetcn7h4z5xxvd0kf5xuczjgqq2aehc";
        assert!(parse_address(receiver, Network::Bitcoin).is_ok());
        assert!(parse_address(receiver, Network::Testnet).is_err());
        assert!(parse_address("not an address", Network::Bitcoin).is_err());
    }
}
