//! Typed token events decoded from raw contract events.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use super::abi;
use crate::errors::LedgerError;
use crate::ledger::{ContractEvent, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub owner: String,
    pub spender: String,
    pub value: U256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_ledger: Option<u32>,
}

/// Check the event name and return the two address topics after it.
fn addresses(event: &ContractEvent, name: &str) -> Result<(String, String), LedgerError> {
    match event.topics.as_slice() {
        [Value::String(topic), Value::Address(a), Value::Address(b), ..] if topic == name => {
            Ok((a.clone(), b.clone()))
        }
        _ => Err(LedgerError::Decode(format!(
            "`{name}` event needs [name, address, address] topics"
        ))),
    }
}

impl TryFrom<&ContractEvent> for TransferEvent {
    type Error = LedgerError;

    fn try_from(event: &ContractEvent) -> Result<Self, Self::Error> {
        let (from, to) = addresses(event, abi::TRANSFER_EVENT)?;
        Ok(Self {
            from,
            to,
            value: abi::amount(event.data.clone())?,
        })
    }
}

impl TryFrom<&ContractEvent> for ApprovalEvent {
    type Error = LedgerError;

    fn try_from(event: &ContractEvent) -> Result<Self, Self::Error> {
        let (owner, spender) = addresses(event, abi::APPROVAL_EVENT)?;
        // Soroban tokens publish `[amount, expiration_ledger]`, plain ERC-20
        // style tokens only the amount.
        let (value, expiration_ledger) = match &event.data {
            Value::Vec(items) => match items.as_slice() {
                [amount, Value::U32(expiration)] => {
                    (abi::amount(amount.clone())?, Some(*expiration))
                }
                _ => {
                    return Err(LedgerError::Decode(
                        "approval data must be [amount, expiration_ledger]".to_string(),
                    ))
                }
            },
            other => (abi::amount(other.clone())?, None),
        };
        Ok(Self {
            owner,
            spender,
            value,
            expiration_ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(topics: Vec<Value>, data: Value) -> ContractEvent {
        ContractEvent {
            contract: "CTOKEN".to_string(),
            ledger: 3,
            topics,
            data,
        }
    }

    #[test]
    fn test_transfer_event_decodes() {
        let event = raw(
            vec![
                Value::String("transfer".into()),
                Value::Address("GA".into()),
                Value::Address("GB".into()),
            ],
            Value::Amount(U256::from(100u64)),
        );
        assert_eq!(
            TransferEvent::try_from(&event).unwrap(),
            TransferEvent {
                from: "GA".into(),
                to: "GB".into(),
                value: U256::from(100u64),
            }
        );
    }

    #[test]
    fn test_approval_event_with_and_without_expiration() {
        let topics = vec![
            Value::String("approve".into()),
            Value::Address("GA".into()),
            Value::Address("GS".into()),
        ];
        let soroban = raw(
            topics.clone(),
            Value::Vec(vec![Value::Amount(U256::from(5u64)), Value::U32(99)]),
        );
        let approval = ApprovalEvent::try_from(&soroban).unwrap();
        assert_eq!(approval.expiration_ledger, Some(99));
        assert_eq!(approval.value, U256::from(5u64));

        let plain = raw(topics, Value::Amount(U256::from(5u64)));
        assert_eq!(ApprovalEvent::try_from(&plain).unwrap().expiration_ledger, None);
    }

    #[test]
    fn test_malformed_events_are_rejected() {
        let wrong_name = raw(
            vec![
                Value::String("mint".into()),
                Value::Address("GA".into()),
                Value::Address("GB".into()),
            ],
            Value::Amount(U256::from(1u64)),
        );
        assert!(TransferEvent::try_from(&wrong_name).is_err());

        let short = raw(
            vec![Value::String("transfer".into())],
            Value::Amount(U256::from(1u64)),
        );
        assert!(TransferEvent::try_from(&short).is_err());

        let bad_data = raw(
            vec![
                Value::String("approve".into()),
                Value::Address("GA".into()),
                Value::Address("GS".into()),
            ],
            Value::Vec(vec![Value::U32(1)]),
        );
        assert!(ApprovalEvent::try_from(&bad_data).is_err());
    }

    #[test]
    fn test_approval_event_json_omits_missing_expiration() {
        let event = ApprovalEvent {
            owner: "GA".into(),
            spender: "GS".into(),
            value: U256::from(1u64),
            expiration_ledger: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("expiration_ledger").is_none());
    }
}
