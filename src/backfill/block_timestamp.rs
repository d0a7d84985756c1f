use crate::backfill::decode::DecodedLog;
use alloy::primitives::{BlockNumber, BlockTimestamp};
use alloy::providers::Provider;
use chrono::{DateTime, Utc};
use eyre::{Context, ContextCompat, OptionExt, Result};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::path::Path;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
struct BlockWithTimestamp {
    timestamp: u64,
    number: u64,
}

/// Block timestamps known so far, mirrored to an append-only CSV file.
pub struct BlockTimestampCache {
    csv_writer: csv::Writer<std::fs::File>,
    block_timestamp_by_number: HashMap<BlockNumber, BlockTimestamp>,
}

impl BlockTimestampCache {
    pub fn try_new(path: &Path) -> Result<Self> {
        let Ok(mut csv_reader) = csv::Reader::from_path(path) else {
            let csv_writer = csv::Writer::from_path(path)
                .wrap_err(format!("Failed to create {}", path.display()))?;

            info!("No blocks timestamp file found at {}", path.display());
            return Ok(Self {
                csv_writer,
                block_timestamp_by_number: HashMap::new(),
            });
        };
        info!("Reading blocks timestamp file...");

        let mut block_timestamp_by_number = HashMap::new();
        for block in csv_reader.deserialize::<BlockWithTimestamp>() {
            let block = block?;
            block_timestamp_by_number.insert(block.number, block.timestamp);
        }
        info!(
            "Reading blocks timestamp file done.({})",
            block_timestamp_by_number.len()
        );

        // An empty file from a run that cached nothing still needs its header.
        let needs_headers = std::fs::metadata(path)?.len() == 0;
        let csv_writer = csv::WriterBuilder::new()
            .has_headers(needs_headers)
            .from_writer(OpenOptions::new().append(true).open(path)?);

        Ok(Self {
            csv_writer,
            block_timestamp_by_number,
        })
    }

    pub fn get(&self, block_number: BlockNumber) -> Option<BlockTimestamp> {
        self.block_timestamp_by_number.get(&block_number).copied()
    }

    pub fn insert(&mut self, block_number: BlockNumber, timestamp: BlockTimestamp) -> Result<()> {
        if self
            .block_timestamp_by_number
            .insert(block_number, timestamp)
            .is_none()
        {
            self.csv_writer.serialize(BlockWithTimestamp {
                number: block_number,
                timestamp,
            })?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.block_timestamp_by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block_timestamp_by_number.is_empty()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.csv_writer.flush()?;
        Ok(())
    }
}

pub struct BlockTimestampFetcher<P> {
    provider: P,
    cache: BlockTimestampCache,
}

impl<P: Provider> BlockTimestampFetcher<P> {
    pub fn try_new(provider: P, cache_path: &Path) -> Result<Self> {
        Ok(Self {
            provider,
            cache: BlockTimestampCache::try_new(cache_path)?,
        })
    }

    pub async fn fetch_timestamp(&mut self, block_number: BlockNumber) -> Result<BlockTimestamp> {
        if let Some(timestamp) = self.cache.get(block_number) {
            return Ok(timestamp);
        }

        let block_timestamp = self
            .provider
            .get_block_by_number(block_number.into())
            .await?
            .wrap_err(format!("Block {} not found", block_number))?
            .header
            .timestamp;
        self.cache.insert(block_number, block_timestamp)?;

        Ok(block_timestamp)
    }

    /// Fills `block_timestamp` on every log the node didn't already stamp.
    pub async fn fill_timestamps(&mut self, logs: &mut [DecodedLog]) -> Result<()> {
        for log in logs.iter().filter(|log| log.block_timestamp.is_some()) {
            if let Some(timestamp) = log.block_timestamp {
                self.cache
                    .insert(log.block_number, timestamp.timestamp() as u64)?;
            }
        }

        let missing: BTreeSet<BlockNumber> = logs
            .iter()
            .filter(|log| log.block_timestamp.is_none())
            .map(|log| log.block_number)
            .collect();
        debug!("Resolving {} block timestamps", missing.len());

        let mut timestamps = HashMap::with_capacity(missing.len());
        for block_number in missing {
            let timestamp = self
                .fetch_timestamp(block_number)
                .await
                .wrap_err(format!("Failed to fetch block timestamp {}", block_number))?;
            timestamps.insert(
                block_number,
                DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
                    .ok_or_eyre(format!("Invalid timestamp {} for block {}", timestamp, block_number))?,
            );
        }

        for log in logs.iter_mut() {
            if log.block_timestamp.is_none() {
                log.block_timestamp = timestamps.get(&log.block_number).copied();
            }
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backfill::decode::EventDecoder;
    use crate::backfill::decode::tests::{pool_events, rpc_log, sample_mint};
    use alloy::primitives::{Address, B256, Bloom};
    use alloy::providers::ProviderBuilder;
    use alloy::providers::mock::Asserter;
    use alloy::sol_types::SolEvent;
    use serde_json::{Value, json};

    /// `eth_getBlockByNumber` result with empty transactions.
    pub fn block_response(number: BlockNumber, timestamp: BlockTimestamp) -> Value {
        json!({
            "hash": B256::with_last_byte(number as u8),
            "parentHash": B256::ZERO,
            "sha3Uncles": B256::ZERO,
            "miner": Address::ZERO,
            "stateRoot": B256::ZERO,
            "transactionsRoot": B256::ZERO,
            "receiptsRoot": B256::ZERO,
            "logsBloom": Bloom::ZERO,
            "difficulty": "0x0",
            "number": format!("{number:#x}"),
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x0",
            "timestamp": format!("{timestamp:#x}"),
            "extraData": "0x",
            "mixHash": B256::ZERO,
            "nonce": "0x0000000000000000",
            "uncles": [],
            "transactions": [],
        })
    }

    fn decoded_mint(block_number: BlockNumber, log_index: u64) -> DecodedLog {
        EventDecoder::new(&pool_events(&["Mint"]))
            .decode(&rpc_log(sample_mint().encode_log_data(), block_number, log_index))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.csv");

        let mut cache = BlockTimestampCache::try_new(&path).unwrap();
        assert!(cache.is_empty());
        cache.insert(17_800_000, 1_690_956_623).unwrap();
        cache.insert(17_800_001, 1_690_956_635).unwrap();
        cache.insert(17_800_000, 1_690_956_623).unwrap();
        cache.flush().unwrap();
        drop(cache);

        let mut cache = BlockTimestampCache::try_new(&path).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(17_800_000), Some(1_690_956_623));
        assert_eq!(cache.get(17_800_001), Some(1_690_956_635));
        assert_eq!(cache.get(17_800_002), None);

        cache.insert(17_800_002, 1_690_956_647).unwrap();
        cache.flush().unwrap();
        drop(cache);

        let cache = BlockTimestampCache::try_new(&path).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(17_800_002), Some(1_690_956_647));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert_eq!(contents.lines().next(), Some("timestamp,number"));
    }

    #[tokio::test]
    async fn cached_blocks_skip_the_rpc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.csv");
        let mut cache = BlockTimestampCache::try_new(&path).unwrap();
        cache.insert(17_800_000, 1_690_956_623).unwrap();
        cache.flush().unwrap();
        drop(cache);

        // Only the uncached block is served. Asking for the cached one would
        // hand it this response and leave nothing for 17_800_005.
        let asserter = Asserter::new();
        asserter.push_success(&block_response(17_800_005, 1_690_956_683));
        let provider = ProviderBuilder::new().connect_mocked_client(asserter);

        let mut fetcher = BlockTimestampFetcher::try_new(provider, &path).unwrap();
        let mut logs = vec![
            decoded_mint(17_800_000, 1),
            decoded_mint(17_800_005, 0),
            decoded_mint(17_800_005, 4),
        ];
        fetcher.fill_timestamps(&mut logs).await.unwrap();
        fetcher.flush().unwrap();

        let timestamps: Vec<i64> = logs
            .iter()
            .map(|log| log.block_timestamp.unwrap().timestamp())
            .collect();
        assert_eq!(timestamps, vec![1_690_956_623, 1_690_956_683, 1_690_956_683]);

        let cache = BlockTimestampCache::try_new(&path).unwrap();
        assert_eq!(cache.get(17_800_005), Some(1_690_956_683));
    }

    #[tokio::test]
    async fn node_supplied_timestamps_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.csv");
        let provider = ProviderBuilder::new().connect_mocked_client(Asserter::new());

        let mut fetcher = BlockTimestampFetcher::try_new(provider, &path).unwrap();
        let mut log = decoded_mint(17_800_000, 1);
        log.block_timestamp = DateTime::<Utc>::from_timestamp(1_690_956_623, 0);
        fetcher.fill_timestamps(std::slice::from_mut(&mut log)).await.unwrap();
        assert_eq!(fetcher.fetch_timestamp(17_800_000).await.unwrap(), 1_690_956_623);
    }

    #[tokio::test]
    async fn missing_block_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let asserter = Asserter::new();
        asserter.push_success(&Value::Null);
        let provider = ProviderBuilder::new().connect_mocked_client(asserter);

        let mut fetcher =
            BlockTimestampFetcher::try_new(provider, &dir.path().join("blocks.csv")).unwrap();
        let mut logs = vec![decoded_mint(17_800_000, 1)];
        assert!(fetcher.fill_timestamps(&mut logs).await.is_err());
    }
}
