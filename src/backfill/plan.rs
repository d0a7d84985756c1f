use crate::abi_registry::{AbiStore, load_abis};
use crate::backfill::decode::EventDecoder;
use crate::error::BackfillError;
use crate::helper::{StringifyQuoted, ThousandsSeparated};
use alloy::json_abi::Event;
use alloy::primitives::{Address, BlockNumber};
use log::{debug, warn};
use std::fmt;

/// Inclusive range of blocks fetched with a single `eth_getLogs` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: BlockNumber,
    pub end: BlockNumber,
}
impl BlockRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}
impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Splits `[from_block, to_block)` into ascending chunks of at most `chunk_size` blocks.
///
/// `to_block` itself is not fetched, so `from_block == to_block` plans nothing.
pub fn block_ranges(
    from_block: BlockNumber,
    to_block: BlockNumber,
    chunk_size: u64,
) -> Result<Vec<BlockRange>, BackfillError> {
    if from_block > to_block {
        return Err(BackfillError::InvalidBlockRange {
            from: from_block,
            to: to_block,
        });
    }
    if chunk_size == 0 {
        return Err(BackfillError::ZeroChunkSize);
    }

    let mut ranges = Vec::new();
    let mut start = from_block;
    while start < to_block {
        let next = start.saturating_add(chunk_size).min(to_block);
        ranges.push(BlockRange {
            start,
            end: next - 1,
        });
        start = next;
    }

    Ok(ranges)
}

#[derive(Debug, Clone)]
pub struct EventBackfillRequest {
    pub abi_names: Vec<String>,
    pub event_names: Vec<String>,
    pub contract_address: Address,
    pub from_block: Option<BlockNumber>,
    pub to_block: Option<BlockNumber>,
    pub chunk_size: u64,
}

#[derive(Debug, Clone)]
pub struct EventBackfillPlan {
    pub abi_name: String,
    pub event_names: Vec<String>,
    pub events: Vec<Event>,
    pub contract_address: Address,
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    pub chunk_size: u64,
    pub chunks: Vec<BlockRange>,
}

impl EventBackfillPlan {
    /// Validates the request against the ABI registry. Nothing touches the RPC here.
    pub async fn try_new(
        store: &impl AbiStore,
        request: EventBackfillRequest,
    ) -> Result<Self, BackfillError> {
        if request.abi_names.len() != 1 {
            return Err(BackfillError::ExpectedSingleAbi(request.abi_names.len()));
        }
        let stored_abi = load_abis(store, &request.abi_names)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackfillError::AbisNotInDb(request.abi_names.clone()))?;

        let mut event_names: Vec<String> = Vec::with_capacity(request.event_names.len());
        for event_name in request.event_names {
            if !event_names.contains(&event_name) {
                event_names.push(event_name);
            }
        }
        if event_names.is_empty() {
            return Err(BackfillError::NoEvents);
        }

        let missing_events: Vec<String> = event_names
            .iter()
            .filter(|name| !stored_abi.abi.events.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing_events.is_empty() {
            return Err(BackfillError::EventsNotInAbi {
                abi: stored_abi.name,
                events: missing_events,
            });
        }

        let mut events = Vec::new();
        for event_name in &event_names {
            for event in stored_abi.abi.event(event_name).into_iter().flatten() {
                if event.anonymous {
                    warn!(
                        "Skip anonymous event {}, it can't be matched by topic",
                        event.signature()
                    );
                    continue;
                }
                debug!("Decoding {} ({})", event.signature(), event.selector());
                events.push(event.clone());
            }
        }

        let from_block = request
            .from_block
            .ok_or(BackfillError::MissingBlock("--from-block"))?;
        let to_block = request
            .to_block
            .ok_or(BackfillError::MissingBlock("--to-block"))?;
        let chunks = block_ranges(from_block, to_block, request.chunk_size)?;

        Ok(Self {
            abi_name: stored_abi.name,
            event_names,
            events,
            contract_address: request.contract_address,
            from_block,
            to_block,
            chunk_size: request.chunk_size,
            chunks,
        })
    }

    pub fn total_blocks(&self) -> u64 {
        self.to_block - self.from_block
    }

    pub fn decoder(&self) -> EventDecoder {
        EventDecoder::new(&self.events)
    }
}

impl fmt::Display for EventBackfillPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "------ Backfill Plan for Ethereum Events ------")?;
        writeln!(f, "Backfill Block Ranges")?;
        writeln!(
            f,
            "    From Block:    {}",
            self.from_block.thousands_separated()
        )?;
        writeln!(f, "    To Block:      {}", self.to_block.thousands_separated())?;
        writeln!(
            f,
            "    Total Blocks:  {}",
            self.total_blocks().thousands_separated()
        )?;
        writeln!(
            f,
            "    Chunk Size:    {} ({} chunks)",
            self.chunk_size.thousands_separated(),
            (self.chunks.len() as u64).thousands_separated()
        )?;
        writeln!(f, "Contract Address:  {}", self.contract_address)?;
        write!(
            f,
            "{} ABI Decoding Events: {}",
            self.abi_name,
            self.event_names.as_slice().stringify_quoted()
        )
    }
}
