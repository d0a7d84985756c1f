use thiserror::Error;

/// Errors caused by the request itself rather than by the infrastructure.
///
/// These are reported to the user and never abort the process with a failure
/// exit code.
#[derive(Error, Debug)]
pub enum BackfillError {
    #[error(
        "Expected 1 ABI for Event backfill, got {0}. Specify an ABI using --contract-abi"
    )]
    ExpectedSingleAbi(usize),

    #[error("ABIs not in DB: {}", .0.join(", "))]
    AbisNotInDb(Vec<String>),

    #[error("No events selected. Specify events using --event-name")]
    NoEvents,

    #[error("Events not in {abi} ABI: {}", .events.join(", "))]
    EventsNotInAbi { abi: String, events: Vec<String> },

    #[error("Missing block bound. Specify it using {0}")]
    MissingBlock(&'static str),

    #[error("From block {from} is after to block {to}")]
    InvalidBlockRange { from: u64, to: u64 },

    #[error("Chunk size must be greater than 0")]
    ZeroChunkSize,

    #[error("No RPC endpoint configured. Specify it using --json-rpc or JSON_RPC")]
    MissingRpcEndpoint,

    #[error("Invalid RPC endpoint {0}")]
    InvalidRpcEndpoint(String),

    #[error("ABI {0} already exists")]
    AbiExists(String),

    #[error("Failed to read ABI file {path}: {source}")]
    AbiFile {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid ABI {name}: {source}")]
    InvalidAbi {
        name: String,
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
