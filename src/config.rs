use crate::error::BackfillError;
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
};
use alloy::providers::{Identity, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::transports::layers::RetryBackoffLayer;
use clap::Args;
use log::debug;
use std::path::PathBuf;

const MAX_RETRY: u32 = 10;
const BACKOFF: u64 = 1000;
const CUPS: u64 = 10_000;
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;
pub const DEFAULT_BLOCK_CACHE: &str = "blocks.csv";
pub const DB_MAX_CONNECTIONS: u32 = 3;

pub type ProviderFiller = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider,
>;

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Postgres connection url
    #[arg(long, env = "DB_URL")]
    pub db_url: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RpcArgs {
    /// JSON-RPC url of an Ethereum node
    #[arg(long = "json-rpc", env = "JSON_RPC")]
    pub json_rpc: Option<String>,
}

impl RpcArgs {
    /// Builds an HTTP provider that backs off when the node rate limits us.
    pub fn connect(&self) -> Result<ProviderFiller, BackfillError> {
        let rpc_url = self
            .json_rpc
            .as_deref()
            .ok_or(BackfillError::MissingRpcEndpoint)?;
        let url = rpc_url
            .parse()
            .map_err(|_| BackfillError::InvalidRpcEndpoint(rpc_url.to_string()))?;
        debug!("Connecting to rpc {}", rpc_url);

        let client = RpcClient::builder()
            .layer(RetryBackoffLayer::new(MAX_RETRY, BACKOFF, CUPS))
            .http(url);
        Ok(ProviderBuilder::new().connect_client(client))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ChunkArgs {
    /// Number of blocks requested per eth_getLogs call
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// CSV file caching block timestamps between runs
    #[arg(long, default_value = DEFAULT_BLOCK_CACHE)]
    pub block_cache: PathBuf,
}
