pub mod block_timestamp;
pub mod decode;
pub mod persist;
pub mod plan;

use crate::backfill::block_timestamp::BlockTimestampFetcher;
use crate::backfill::decode::DecodedLog;
use crate::backfill::persist::{InsertCounts, LogSink};
use crate::backfill::plan::{BlockRange, EventBackfillPlan};
use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use eyre::{Context, Result};
use log::{debug, info};
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub chunks: usize,
    pub logs: usize,
    pub inserted: InsertCounts,
}

impl BackfillSummary {
    fn record(&mut self, logs: usize, inserted: InsertCounts) {
        self.chunks += 1;
        self.logs += logs;
        for (table, count) in inserted {
            *self.inserted.entry(table).or_default() += count;
        }
    }

    pub fn total_inserted(&self) -> u64 {
        self.inserted.values().sum()
    }
}

/// `eth_getLogs` filter for one chunk: the contract's logs whose topic0 is one of `selectors`.
pub fn log_filter(contract_address: Address, selectors: Vec<B256>, range: BlockRange) -> Filter {
    Filter::new()
        .address(contract_address)
        .event_signature(selectors)
        .from_block(range.start)
        .to_block(range.end)
}

pub async fn fetch_logs(
    provider: &impl Provider,
    contract_address: Address,
    selectors: Vec<B256>,
    range: BlockRange,
) -> Result<Vec<Log>> {
    let filter = log_filter(contract_address, selectors, range);

    provider
        .get_logs(&filter)
        .await
        .wrap_err(format!("Failed to fetch logs for blocks {}", range))
}

/// Runs the plan chunk by chunk. Each chunk is committed before the next is fetched.
pub async fn start<P: Provider + Clone>(
    sink: &mut impl LogSink,
    provider: P,
    plan: &EventBackfillPlan,
    block_cache: &Path,
) -> Result<BackfillSummary> {
    info!(
        "Backfilling {} events for {} from block {} to {}...",
        plan.event_names.join(", "),
        plan.contract_address,
        plan.from_block,
        plan.to_block
    );

    let decoder = plan.decoder();
    let selectors = decoder.selectors();
    let mut block_timestamp_fetcher = BlockTimestampFetcher::try_new(provider.clone(), block_cache)?;
    let mut summary = BackfillSummary::default();

    for (id, range) in plan.chunks.iter().enumerate() {
        info!(
            "Backfilling blocks {} [{}/{}]",
            range,
            id + 1,
            plan.chunks.len()
        );

        let logs = fetch_logs(&provider, plan.contract_address, selectors.clone(), *range).await?;

        let mut decoded_logs = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(decoded) = decoder.decode(log)? {
                debug!("{} => {:?}", decoded.event_name, decoded.params);
                decoded_logs.push(decoded);
            }
        }
        sort_logs(&mut decoded_logs);

        block_timestamp_fetcher.fill_timestamps(&mut decoded_logs).await?;

        let inserted = sink.store(*range, &decoded_logs).await?;
        info!(
            "Blocks {}: {} logs, {} new rows {:?}",
            range,
            decoded_logs.len(),
            inserted.values().sum::<u64>(),
            inserted
        );
        summary.record(decoded_logs.len(), inserted);

        block_timestamp_fetcher.flush()?;
    }

    info!(
        "Backfilling done. {} chunks, {} logs, {} new rows",
        summary.chunks,
        summary.logs,
        summary.total_inserted()
    );
    Ok(summary)
}

fn sort_logs(logs: &mut [DecodedLog]) {
    logs.sort_by(|a, b| {
        a.block_number
            .cmp(&b.block_number)
            .then(a.log_index.cmp(&b.log_index))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi_registry::memory::MemoryAbiStore;
    use crate::backfill::block_timestamp::tests::block_response;
    use crate::backfill::decode::EventDecoder;
    use crate::backfill::decode::tests::{
        WBTC_WETH_UNI_V3_POOL, pool_events, rpc_log, sample_burn, sample_collect, sample_mint,
    };
    use crate::backfill::persist::EventTable;
    use crate::backfill::plan::EventBackfillRequest;
    use alloy::providers::ProviderBuilder;
    use alloy::providers::mock::Asserter;
    use alloy::sol_types::SolEvent;

    const UNISWAP_V3_POOL_ABI: &str = include_str!("../abi/UniswapV3Pool.json");

    /// Keeps every chunk it is handed and counts each log as a new row.
    #[derive(Default)]
    struct RecordingSink {
        chunks: Vec<(BlockRange, Vec<DecodedLog>)>,
    }

    impl LogSink for RecordingSink {
        async fn store(&mut self, range: BlockRange, logs: &[DecodedLog]) -> Result<InsertCounts> {
            let mut counts = InsertCounts::new();
            for log in logs {
                *counts
                    .entry(EventTable::for_signature(&log.event_signature).table_name())
                    .or_default() += 1;
            }
            self.chunks.push((range, logs.to_vec()));
            Ok(counts)
        }
    }

    fn rpc_log_at(data: alloy::primitives::LogData, block: u64, index: u64, timestamp: Option<u64>) -> Log {
        let mut log = rpc_log(data, block, index);
        log.block_timestamp = timestamp;
        log
    }

    #[test]
    fn summary_accumulates_per_table() {
        let mut summary = BackfillSummary::default();
        summary.record(
            3,
            InsertCounts::from([("uniswap_v3_mint_events", 2), ("uniswap_v3_burn_events", 1)]),
        );
        summary.record(1, InsertCounts::from([("uniswap_v3_mint_events", 1)]));
        summary.record(0, InsertCounts::new());

        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.logs, 4);
        assert_eq!(summary.inserted["uniswap_v3_mint_events"], 3);
        assert_eq!(summary.total_inserted(), 4);
    }

    #[test]
    fn logs_are_ordered_by_position_in_chain() {
        let decoder = EventDecoder::new(&pool_events(&["Mint", "Burn"]));
        let mut logs: Vec<DecodedLog> = [
            rpc_log(sample_burn().encode_log_data(), 18_000_002, 4),
            rpc_log(sample_mint().encode_log_data(), 18_000_001, 9),
            rpc_log(sample_mint().encode_log_data(), 18_000_002, 1),
        ]
        .iter()
        .filter_map(|log| decoder.decode(log).unwrap())
        .collect();

        sort_logs(&mut logs);

        let positions: Vec<(u64, u64)> = logs
            .iter()
            .map(|log| (log.block_number, log.log_index))
            .collect();
        assert_eq!(
            positions,
            vec![(18_000_001, 9), (18_000_002, 1), (18_000_002, 4)]
        );
    }

    #[test]
    fn filter_targets_chunk_and_selectors() {
        let decoder = EventDecoder::new(&pool_events(&["Mint", "Burn"]));
        let range = BlockRange {
            start: 17_810_000,
            end: 17_819_999,
        };

        let filter = log_filter(WBTC_WETH_UNI_V3_POOL, decoder.selectors(), range);

        assert_eq!(filter.get_from_block(), Some(17_810_000));
        assert_eq!(filter.get_to_block(), Some(17_819_999));
        assert!(filter.address.matches(&WBTC_WETH_UNI_V3_POOL));
        assert!(!filter.address.matches(&Address::ZERO));
        for selector in decoder.selectors() {
            assert!(filter.topics[0].matches(&selector));
        }
        let collect = EventDecoder::new(&pool_events(&["Collect"])).selectors()[0];
        assert!(!filter.topics[0].matches(&collect));
    }

    #[tokio::test]
    async fn start_runs_chunks_in_order_with_timestamps() {
        let store = MemoryAbiStore::with_abi("UniswapV3Pool", UNISWAP_V3_POOL_ABI);
        let plan = EventBackfillPlan::try_new(
            &store,
            EventBackfillRequest {
                abi_names: vec!["UniswapV3Pool".to_string()],
                event_names: vec!["Mint".to_string(), "Burn".to_string()],
                contract_address: WBTC_WETH_UNI_V3_POOL,
                from_block: Some(100),
                to_block: Some(120),
                chunk_size: 10,
            },
        )
        .await
        .unwrap();
        assert_eq!(
            plan.chunks,
            vec![
                BlockRange { start: 100, end: 109 },
                BlockRange { start: 110, end: 119 },
            ]
        );

        // Responses are served in request order: logs of a chunk, then the
        // blocks it is missing timestamps for, ascending.
        let asserter = Asserter::new();
        asserter.push_success(&vec![
            rpc_log_at(sample_mint().encode_log_data(), 105, 2, None),
            rpc_log_at(sample_collect().encode_log_data(), 104, 0, None),
            rpc_log_at(sample_burn().encode_log_data(), 103, 7, None),
        ]);
        asserter.push_success(&block_response(103, 1_000_036));
        asserter.push_success(&block_response(105, 1_000_060));
        asserter.push_success(&vec![
            rpc_log_at(sample_burn().encode_log_data(), 112, 1, Some(1_000_144)),
            rpc_log_at(sample_mint().encode_log_data(), 111, 0, None),
        ]);
        asserter.push_success(&block_response(111, 1_000_132));
        let provider = ProviderBuilder::new().connect_mocked_client(asserter);

        let dir = tempfile::tempdir().unwrap();
        let block_cache = dir.path().join("blocks.csv");
        let mut sink = RecordingSink::default();
        let summary = start(&mut sink, provider, &plan, &block_cache).await.unwrap();

        let stored: Vec<(BlockRange, Vec<(u64, &str, i64)>)> = sink
            .chunks
            .iter()
            .map(|(range, logs)| {
                let logs = logs
                    .iter()
                    .map(|log| {
                        (
                            log.block_number,
                            log.event_name.as_str(),
                            log.block_timestamp.unwrap().timestamp(),
                        )
                    })
                    .collect();
                (*range, logs)
            })
            .collect();
        assert_eq!(
            stored,
            vec![
                (
                    BlockRange { start: 100, end: 109 },
                    vec![(103, "Burn", 1_000_036), (105, "Mint", 1_000_060)]
                ),
                (
                    BlockRange { start: 110, end: 119 },
                    vec![(111, "Mint", 1_000_132), (112, "Burn", 1_000_144)]
                ),
            ]
        );
        assert_eq!(sink.chunks[0].1[1].tick("tickLower").unwrap(), 254220);

        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.logs, 4);
        assert_eq!(summary.inserted["uniswap_v3_mint_events"], 2);
        assert_eq!(summary.inserted["uniswap_v3_burn_events"], 2);

        let cache = block_timestamp::BlockTimestampCache::try_new(&block_cache).unwrap();
        for (block, timestamp) in [
            (103, 1_000_036),
            (105, 1_000_060),
            (111, 1_000_132),
            (112, 1_000_144),
        ] {
            assert_eq!(cache.get(block), Some(timestamp));
        }
    }

    #[tokio::test]
    async fn rpc_failure_stops_before_storing() {
        let store = MemoryAbiStore::with_abi("UniswapV3Pool", UNISWAP_V3_POOL_ABI);
        let plan = EventBackfillPlan::try_new(
            &store,
            EventBackfillRequest {
                abi_names: vec!["UniswapV3Pool".to_string()],
                event_names: vec!["Mint".to_string()],
                contract_address: WBTC_WETH_UNI_V3_POOL,
                from_block: Some(100),
                to_block: Some(120),
                chunk_size: 10,
            },
        )
        .await
        .unwrap();

        let asserter = Asserter::new();
        asserter.push_success(&Vec::<Log>::new());
        asserter.push_failure_msg("query returned more than 10000 results");
        let provider = ProviderBuilder::new().connect_mocked_client(asserter);

        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::default();
        let err = start(&mut sink, provider, &plan, &dir.path().join("blocks.csv"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("110..=119"));
        assert_eq!(sink.chunks.len(), 1);
        assert!(sink.chunks[0].1.is_empty());
    }
}
