use crate::backfill::decode::DecodedLog;
use crate::backfill::plan::BlockRange;
use eyre::{Context, Result};
use log::debug;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::BTreeMap;

/// Destination table of a decoded event, chosen by its full signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventTable {
    UniswapV3Mint,
    UniswapV3Burn,
    UniswapV3Collect,
    UniswapV3Swap,
    UniswapV3Flash,
    Decoded,
}

impl EventTable {
    pub fn for_signature(signature: &str) -> Self {
        match signature {
            "Mint(address,address,int24,int24,uint128,uint256,uint256)" => Self::UniswapV3Mint,
            "Burn(address,int24,int24,uint128,uint256,uint256)" => Self::UniswapV3Burn,
            "Collect(address,address,int24,int24,uint128,uint128)" => Self::UniswapV3Collect,
            "Swap(address,address,int256,int256,uint160,uint128,int24)" => Self::UniswapV3Swap,
            "Flash(address,address,uint256,uint256,uint256,uint256)" => Self::UniswapV3Flash,
            _ => Self::Decoded,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::UniswapV3Mint => "uniswap_v3_mint_events",
            Self::UniswapV3Burn => "uniswap_v3_burn_events",
            Self::UniswapV3Collect => "uniswap_v3_collect_events",
            Self::UniswapV3Swap => "uniswap_v3_swap_events",
            Self::UniswapV3Flash => "uniswap_v3_flash_events",
            Self::Decoded => "decoded_events",
        }
    }

    fn insert_sql(&self) -> &'static str {
        match self {
            Self::UniswapV3Mint => {
                "
                INSERT INTO uniswap_v3_mint_events (
                    block_number, block_timestamp, transaction_hash, log_index, contract_address,
                    sender, owner, tick_lower, tick_upper, amount, amount_0, amount_1
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10::NUMERIC, $11::NUMERIC, $12::NUMERIC
                )
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "
            }
            Self::UniswapV3Burn => {
                "
                INSERT INTO uniswap_v3_burn_events (
                    block_number, block_timestamp, transaction_hash, log_index, contract_address,
                    owner, tick_lower, tick_upper, amount, amount_0, amount_1
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9::NUMERIC, $10::NUMERIC, $11::NUMERIC
                )
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "
            }
            Self::UniswapV3Collect => {
                "
                INSERT INTO uniswap_v3_collect_events (
                    block_number, block_timestamp, transaction_hash, log_index, contract_address,
                    owner, recipient, tick_lower, tick_upper, amount_0, amount_1
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10::NUMERIC, $11::NUMERIC
                )
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "
            }
            Self::UniswapV3Swap => {
                "
                INSERT INTO uniswap_v3_swap_events (
                    block_number, block_timestamp, transaction_hash, log_index, contract_address,
                    sender, recipient, amount_0, amount_1, sqrt_price, liquidity, tick
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9::NUMERIC, $10::NUMERIC,
                    $11::NUMERIC, $12
                )
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "
            }
            Self::UniswapV3Flash => {
                "
                INSERT INTO uniswap_v3_flash_events (
                    block_number, block_timestamp, transaction_hash, log_index, contract_address,
                    sender, recipient, amount_0, amount_1, paid_0, paid_1
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9::NUMERIC, $10::NUMERIC,
                    $11::NUMERIC
                )
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "
            }
            Self::Decoded => {
                "
                INSERT INTO decoded_events (
                    block_number, block_timestamp, transaction_hash, log_index, contract_address,
                    event_name, event_signature, params
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8
                )
                ON CONFLICT (transaction_hash, log_index) DO NOTHING
                "
            }
        }
    }

    /// Binds the common columns, then the event specific ones in `insert_sql` order.
    fn bind<'q>(&self, log: &'q DecodedLog) -> Result<Query<'q, Postgres, PgArguments>> {
        let query = sqlx::query(self.insert_sql())
            .bind(i64::try_from(log.block_number).wrap_err("Block number overflows BIGINT")?)
            .bind(log.block_timestamp)
            .bind(log.transaction_hash.as_slice())
            .bind(i32::try_from(log.log_index).wrap_err("Log index overflows INTEGER")?)
            .bind(log.contract_address.as_slice());

        let query = match self {
            Self::UniswapV3Mint => query
                .bind(log.address("sender")?.to_vec())
                .bind(log.address("owner")?.to_vec())
                .bind(log.tick("tickLower")?)
                .bind(log.tick("tickUpper")?)
                .bind(log.numeric("amount")?)
                .bind(log.numeric("amount0")?)
                .bind(log.numeric("amount1")?),
            Self::UniswapV3Burn => query
                .bind(log.address("owner")?.to_vec())
                .bind(log.tick("tickLower")?)
                .bind(log.tick("tickUpper")?)
                .bind(log.numeric("amount")?)
                .bind(log.numeric("amount0")?)
                .bind(log.numeric("amount1")?),
            Self::UniswapV3Collect => query
                .bind(log.address("owner")?.to_vec())
                .bind(log.address("recipient")?.to_vec())
                .bind(log.tick("tickLower")?)
                .bind(log.tick("tickUpper")?)
                .bind(log.numeric("amount0")?)
                .bind(log.numeric("amount1")?),
            Self::UniswapV3Swap => query
                .bind(log.address("sender")?.to_vec())
                .bind(log.address("recipient")?.to_vec())
                .bind(log.numeric("amount0")?)
                .bind(log.numeric("amount1")?)
                .bind(log.numeric("sqrtPriceX96")?)
                .bind(log.numeric("liquidity")?)
                .bind(log.tick("tick")?),
            Self::UniswapV3Flash => query
                .bind(log.address("sender")?.to_vec())
                .bind(log.address("recipient")?.to_vec())
                .bind(log.numeric("amount0")?)
                .bind(log.numeric("amount1")?)
                .bind(log.numeric("paid0")?)
                .bind(log.numeric("paid1")?),
            Self::Decoded => query
                .bind(log.event_name.as_str())
                .bind(log.event_signature.as_str())
                .bind(Json(log.params_json())),
        };

        Ok(query)
    }
}

/// Rows inserted per table. Rows already present are not counted.
pub type InsertCounts = BTreeMap<&'static str, u64>;

pub async fn insert_log(executor: &mut PgConnection, log: &DecodedLog) -> Result<u64> {
    let table = EventTable::for_signature(&log.event_signature);
    let inserted = table
        .bind(log)?
        .execute(executor)
        .await
        .wrap_err(format!(
            "Failed to insert {} (tx {} log {}) into {}",
            log.event_name,
            log.transaction_hash,
            log.log_index,
            table.table_name()
        ))?
        .rows_affected();

    if inserted == 0 {
        debug!(
            "{} tx {} log {} already stored",
            log.event_name, log.transaction_hash, log.log_index
        );
    }
    Ok(inserted)
}

/// Inserts one chunk of decoded logs in a single transaction.
pub async fn insert_logs(pool: &PgPool, logs: &[DecodedLog]) -> Result<InsertCounts> {
    let mut counts = InsertCounts::new();
    if logs.is_empty() {
        return Ok(counts);
    }

    let mut transaction = pool.begin().await?;
    for log in logs {
        let table = EventTable::for_signature(&log.event_signature).table_name();
        let inserted = insert_log(&mut *transaction, log).await?;
        *counts.entry(table).or_default() += inserted;
    }
    transaction.commit().await?;

    Ok(counts)
}

/// Where each decoded chunk ends up.
pub trait LogSink {
    async fn store(&mut self, range: BlockRange, logs: &[DecodedLog]) -> Result<InsertCounts>;
}

impl LogSink for PgPool {
    async fn store(&mut self, range: BlockRange, logs: &[DecodedLog]) -> Result<InsertCounts> {
        insert_logs(self, logs)
            .await
            .wrap_err(format!("Failed to store logs for blocks {}", range))
    }
}
