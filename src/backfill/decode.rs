use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{Address, B256, BlockNumber, TxHash, hex};
use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};
use eyre::{Context, OptionExt, Result, eyre};
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

use crate::helper::to_snake_case;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedParam {
    pub name: String,
    pub value: DynSolValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub event_name: String,
    pub event_signature: String,
    pub block_number: BlockNumber,
    pub block_timestamp: Option<DateTime<Utc>>,
    pub transaction_hash: TxHash,
    pub log_index: u64,
    pub contract_address: Address,
    pub params: Vec<DecodedParam>,
}

impl DecodedLog {
    pub fn param(&self, name: &str) -> Result<&DynSolValue> {
        self.params
            .iter()
            .find(|param| param.name == name)
            .map(|param| &param.value)
            .ok_or_eyre(format!(
                "{} has no param {} (tx {} log {})",
                self.event_signature, name, self.transaction_hash, self.log_index
            ))
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        match self.param(name)? {
            DynSolValue::Address(address) => Ok(*address),
            other => Err(eyre!("{} is not an address: {:?}", name, other)),
        }
    }

    /// Decimal rendering of an integer param, fit for a NUMERIC column.
    pub fn numeric(&self, name: &str) -> Result<String> {
        match self.param(name)? {
            DynSolValue::Uint(value, _) => Ok(value.to_string()),
            DynSolValue::Int(value, _) => Ok(value.to_string()),
            other => Err(eyre!("{} is not an integer: {:?}", name, other)),
        }
    }

    pub fn tick(&self, name: &str) -> Result<i32> {
        match self.param(name)? {
            DynSolValue::Int(value, _) => i32::try_from(*value)
                .map_err(|_| eyre!("{} does not fit in i32: {}", name, value)),
            other => Err(eyre!("{} is not a signed integer: {:?}", name, other)),
        }
    }

    /// Params as a JSON object keyed by snake_case name.
    pub fn params_json(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|param| (to_snake_case(&param.name), dyn_sol_value_to_json(&param.value)))
                .collect(),
        )
    }
}

/// Integers are rendered as strings so no precision is lost in JSON.
pub fn dyn_sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(v, _) => Value::String(v.to_string()),
        DynSolValue::Uint(v, _) => Value::String(v.to_string()),
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word[..*size]))
        }
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => {
            Value::Array(values.iter().map(dyn_sol_value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Matches raw logs to ABI events by topic0 and decodes them.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    events_by_selector: HashMap<B256, Event>,
}

impl EventDecoder {
    pub fn new(events: &[Event]) -> Self {
        Self {
            events_by_selector: events
                .iter()
                .map(|event| (event.selector(), event.clone()))
                .collect(),
        }
    }

    pub fn selectors(&self) -> Vec<B256> {
        let mut selectors: Vec<B256> = self.events_by_selector.keys().copied().collect();
        selectors.sort();
        selectors
    }

    /// Returns `None` for logs of events that weren't requested.
    pub fn decode(&self, log: &Log) -> Result<Option<DecodedLog>> {
        if log.removed {
            debug!("Skip removed log {:?}", log.transaction_hash);
            return Ok(None);
        }
        let Some(event) = log
            .topic0()
            .and_then(|topic| self.events_by_selector.get(topic))
        else {
            return Ok(None);
        };

        let block_number = log.block_number.ok_or_eyre("Log is missing block number")?;
        let transaction_hash = log
            .transaction_hash
            .ok_or_eyre("Log is missing transaction hash")?;
        let log_index = log.log_index.ok_or_eyre("Log is missing log index")?;

        let decoded = event.decode_log(log.data()).wrap_err(format!(
            "Failed to decode {} in tx {} log {}",
            event.signature(),
            transaction_hash,
            log_index
        ))?;

        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let params = event
            .inputs
            .iter()
            .map(|input| {
                let value = match input.indexed {
                    true => indexed.next(),
                    false => body.next(),
                };
                value
                    .map(|value| DecodedParam {
                        name: input.name.clone(),
                        value,
                    })
                    .ok_or_eyre(format!("Missing decoded value for {}", input.name))
            })
            .collect::<Result<Vec<DecodedParam>>>()?;

        let block_timestamp = log
            .block_timestamp
            .and_then(|timestamp| DateTime::<Utc>::from_timestamp(timestamp as i64, 0));

        Ok(Some(DecodedLog {
            event_name: event.name.clone(),
            event_signature: event.signature(),
            block_number,
            block_timestamp,
            transaction_hash,
            log_index,
            contract_address: log.address(),
            params,
        }))
    }
}
