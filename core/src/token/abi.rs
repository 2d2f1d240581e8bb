//! Function names and return-value decoding for the token interface.

use alloy_primitives::U256;

use crate::errors::LedgerError;
use crate::ledger::Value;

pub const NAME: &str = "name";
pub const SYMBOL: &str = "symbol";
pub const DECIMALS: &str = "decimals";
pub const TOTAL_SUPPLY: &str = "total_supply";
pub const BALANCE: &str = "balance";
pub const ALLOWANCE: &str = "allowance";

pub const TRANSFER: &str = "transfer";
pub const TRANSFER_FROM: &str = "transfer_from";
pub const APPROVE: &str = "approve";

pub const TRANSFER_EVENT: &str = "transfer";
pub const APPROVAL_EVENT: &str = "approve";

fn unexpected(expected: &str, got: &Value) -> LedgerError {
    LedgerError::Decode(format!("expected {expected}, got {}", got.kind()))
}

pub fn string(value: Value) -> Result<String, LedgerError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(unexpected("string", &other)),
    }
}

pub fn amount(value: Value) -> Result<U256, LedgerError> {
    match value {
        Value::Amount(a) => Ok(a),
        Value::U32(v) => Ok(U256::from(v)),
        other => Err(unexpected("amount", &other)),
    }
}

pub fn decimals(value: Value) -> Result<u8, LedgerError> {
    match value {
        Value::U32(v) => u8::try_from(v)
            .map_err(|_| LedgerError::Decode(format!("decimals {v} out of range"))),
        other => Err(unexpected("u32", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals_range() {
        assert_eq!(decimals(Value::U32(7)).unwrap(), 7);
        assert!(matches!(
            decimals(Value::U32(256)),
            Err(LedgerError::Decode(_))
        ));
    }

    #[test]
    fn test_wrong_kind_is_decode_error() {
        let err = string(Value::Bool(true)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected return value: expected string, got bool"
        );
        assert!(amount(Value::String("1".into())).is_err());
    }

    #[test]
    fn test_amount_accepts_small_integers() {
        assert_eq!(amount(Value::U32(3)).unwrap(), U256::from(3u64));
        assert_eq!(
            amount(Value::Amount(U256::MAX)).unwrap(),
            U256::MAX
        );
    }
}
