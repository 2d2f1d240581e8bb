//! Conversions between the connection's call model and Soroban `ScVal`s.

use alloy_primitives::U256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use soroban_sdk::xdr::{
    AccountId, Hash, Int128Parts, Limits, PublicKey, ReadXdr, ScAddress, ScString, ScSymbol,
    ScVal, ScVec, Uint256, WriteXdr,
};
use stellar_strkey::Strkey;

use super::Value;
use crate::errors::LedgerError;

/// Parse a `G...` account or `C...` contract strkey.
pub fn address(address: &str) -> Result<ScAddress, LedgerError> {
    let strkey = Strkey::from_string(address)
        .map_err(|e| LedgerError::InvalidArgument(format!("invalid address {address}: {e}")))?;

    match strkey {
        Strkey::Contract(contract) => Ok(ScAddress::Contract(Hash(contract.0))),
        Strkey::PublicKeyEd25519(pubkey) => Ok(ScAddress::Account(AccountId(
            PublicKey::PublicKeyTypeEd25519(Uint256(pubkey.0)),
        ))),
        _ => Err(LedgerError::InvalidArgument(format!(
            "unsupported address type: {address}"
        ))),
    }
}

pub fn address_to_string(address: &ScAddress) -> String {
    match address {
        ScAddress::Account(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(bytes)))) => {
            Strkey::PublicKeyEd25519(stellar_strkey::ed25519::PublicKey(*bytes)).to_string()
        }
        ScAddress::Contract(Hash(bytes)) => {
            Strkey::Contract(stellar_strkey::Contract(*bytes)).to_string()
        }
    }
}

/// Token amounts travel as `i128`.
pub fn amount(value: U256) -> Result<ScVal, LedgerError> {
    let limbs = value.as_limbs();
    if limbs[2] != 0 || limbs[3] != 0 || limbs[1] > i64::MAX as u64 {
        return Err(LedgerError::InvalidArgument(format!(
            "amount {value} does not fit in i128"
        )));
    }
    Ok(ScVal::I128(Int128Parts {
        hi: limbs[1] as i64,
        lo: limbs[0],
    }))
}

pub fn symbol(name: &str) -> Result<ScVal, LedgerError> {
    let sym: ScSymbol = name
        .try_into()
        .map_err(|_| LedgerError::InvalidArgument(format!("invalid symbol: {name}")))?;
    Ok(ScVal::Symbol(sym))
}

fn utf8(bytes: Vec<u8>) -> Result<String, LedgerError> {
    String::from_utf8(bytes).map_err(|e| LedgerError::Decode(format!("invalid UTF-8: {e}")))
}

/// Decode a contract value into the connection's value model.
pub fn to_value(val: &ScVal) -> Result<Value, LedgerError> {
    match val {
        ScVal::Void => Ok(Value::Void),
        ScVal::Bool(b) => Ok(Value::Bool(*b)),
        ScVal::U32(v) => Ok(Value::U32(*v)),
        ScVal::I128(parts) => {
            if parts.hi < 0 {
                return Err(LedgerError::Decode("negative amount".to_string()));
            }
            Ok(Value::Amount(U256::from_limbs([
                parts.lo,
                parts.hi as u64,
                0,
                0,
            ])))
        }
        ScVal::U128(parts) => Ok(Value::Amount(U256::from_limbs([parts.lo, parts.hi, 0, 0]))),
        ScVal::U256(parts) => Ok(Value::Amount(U256::from_limbs([
            parts.lo_lo,
            parts.lo_hi,
            parts.hi_lo,
            parts.hi_hi,
        ]))),
        ScVal::String(ScString(s)) => {
            let bytes: Vec<u8> = s.clone().into();
            Ok(Value::String(utf8(bytes)?))
        }
        ScVal::Symbol(ScSymbol(s)) => {
            let bytes: Vec<u8> = s.clone().into();
            Ok(Value::String(utf8(bytes)?))
        }
        ScVal::Address(addr) => Ok(Value::Address(address_to_string(addr))),
        ScVal::Vec(Some(ScVec(items))) => Ok(Value::Vec(
            items.iter().map(to_value).collect::<Result<Vec<_>, _>>()?,
        )),
        ScVal::Vec(None) => Ok(Value::Vec(Vec::new())),
        other => Err(LedgerError::Decode(format!(
            "unsupported contract value: {other:?}"
        ))),
    }
}

pub fn to_base64<T: WriteXdr>(value: &T) -> Result<String, LedgerError> {
    let bytes = value
        .to_xdr(Limits::none())
        .map_err(|e| LedgerError::Xdr(format!("Failed to encode XDR: {e}")))?;
    Ok(BASE64.encode(bytes))
}

pub fn from_base64<T: ReadXdr>(encoded: &str) -> Result<T, LedgerError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| LedgerError::Xdr(format!("Base64 decode error: {e}")))?;
    T::from_xdr(&bytes, Limits::none())
        .map_err(|e| LedgerError::Xdr(format!("Failed to decode XDR: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use soroban_sdk::xdr::{StringM, VecM};

    fn string(value: &str) -> Result<ScVal, LedgerError> {
        let s: StringM = value
            .as_bytes()
            .to_vec()
            .try_into()
            .map_err(|_| LedgerError::InvalidArgument("string length exceeds limit".to_string()))?;
        Ok(ScVal::String(ScString(s)))
    }

    fn vec(items: Vec<ScVal>) -> Result<ScVal, LedgerError> {
        let vec_m: VecM<ScVal> = items
            .try_into()
            .map_err(|_| LedgerError::InvalidArgument("vector size exceeds limit".to_string()))?;
        Ok(ScVal::Vec(Some(ScVec(vec_m))))
    }

    const ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAGO6V";
    const CONTRACT: &str = "CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAD2KM";

    #[test]
    fn test_address_round_trips_through_strkey() {
        let account = address(ACCOUNT).unwrap();
        assert!(matches!(account, ScAddress::Account(_)));
        assert_eq!(address_to_string(&account), ACCOUNT);

        let contract = address(CONTRACT).unwrap();
        assert!(matches!(contract, ScAddress::Contract(_)));
        assert_eq!(address_to_string(&contract), CONTRACT);
    }

    #[test]
    fn test_malformed_address_is_invalid_argument() {
        assert!(matches!(
            address("0xBBBB"),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_amount_limits() {
        let small = amount(U256::from(1_000u64)).unwrap();
        assert_eq!(to_value(&small).unwrap(), Value::Amount(U256::from(1_000u64)));

        let max = U256::from(i128::MAX as u128);
        assert!(amount(max).is_ok());
        assert!(matches!(
            amount(max + U256::from(1u64)),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let negative = ScVal::I128(Int128Parts { hi: -1, lo: 0 });
        assert!(matches!(to_value(&negative), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_decode_strings_and_symbols() {
        assert_eq!(
            to_value(&string("Test Token").unwrap()).unwrap(),
            Value::String("Test Token".to_string())
        );
        assert_eq!(
            to_value(&symbol("transfer").unwrap()).unwrap(),
            Value::String("transfer".to_string())
        );
    }

    #[test]
    fn test_decode_vec() {
        let val = vec(vec![amount(U256::from(5u64)).unwrap(), ScVal::U32(9)]).unwrap();
        assert_eq!(
            to_value(&val).unwrap(),
            Value::Vec(vec![Value::Amount(U256::from(5u64)), Value::U32(9)])
        );
    }

    #[test]
    fn test_base64_round_trip() {
        let val = ScVal::U32(7);
        let encoded = to_base64(&val).unwrap();
        let decoded: ScVal = from_base64(&encoded).unwrap();
        assert_eq!(decoded, val);
        assert!(from_base64::<ScVal>("not-valid-base64!!!").is_err());
    }
}
