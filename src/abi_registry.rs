use crate::error::BackfillError;
use alloy::json_abi::JsonAbi;
use log::{debug, info};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct StoredAbi {
    pub name: String,
    pub abi: JsonAbi,
}

pub trait AbiStore {
    async fn insert_abi(&self, name: &str, abi: &JsonAbi) -> Result<(), BackfillError>;
    /// Returns the ABIs found among `names`, in no particular order.
    async fn fetch_abis(&self, names: &[String]) -> Result<Vec<StoredAbi>, BackfillError>;
    async fn list_abis(&self) -> Result<Vec<StoredAbi>, BackfillError>;
}

#[derive(Debug, Clone)]
pub struct PgAbiStore {
    pool: PgPool,
}

impl PgAbiStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AbiStore for PgAbiStore {
    async fn insert_abi(&self, name: &str, abi: &JsonAbi) -> Result<(), BackfillError> {
        let inserted = sqlx::query(
            "
            INSERT INTO abis (name, abi_json)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            ",
        )
        .bind(name)
        .bind(Json(abi))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(BackfillError::AbiExists(name.to_string()));
        }
        Ok(())
    }

    async fn fetch_abis(&self, names: &[String]) -> Result<Vec<StoredAbi>, BackfillError> {
        let rows: Vec<(String, Json<JsonAbi>)> = sqlx::query_as(
            "
            SELECT name, abi_json
            FROM abis
            WHERE name = ANY($1)
            ",
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, Json(abi))| StoredAbi { name, abi })
            .collect())
    }

    async fn list_abis(&self) -> Result<Vec<StoredAbi>, BackfillError> {
        let rows: Vec<(String, Json<JsonAbi>)> =
            sqlx::query_as("SELECT name, abi_json FROM abis ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(name, Json(abi))| StoredAbi { name, abi })
            .collect())
    }
}

/// Parses a plain ABI array, or a compiler artifact carrying one under `abi`.
pub fn parse_abi(name: &str, contents: &str) -> Result<JsonAbi, BackfillError> {
    let invalid = |source| BackfillError::InvalidAbi {
        name: name.to_string(),
        source,
    };

    let value: Value = serde_json::from_str(contents).map_err(invalid)?;
    let value = match value {
        Value::Object(mut artifact) => match artifact.remove("abi") {
            Some(abi) => abi,
            None => Value::Object(artifact),
        },
        other => other,
    };

    serde_json::from_value(value).map_err(invalid)
}

pub async fn add_abi(
    store: &impl AbiStore,
    name: &str,
    path: &Path,
) -> Result<JsonAbi, BackfillError> {
    let contents = std::fs::read_to_string(path).map_err(|source| BackfillError::AbiFile {
        path: path.display().to_string(),
        source,
    })?;
    let abi = parse_abi(name, &contents)?;
    debug!(
        "Parsed ABI {} ({} functions, {} events)",
        name,
        abi.functions().count(),
        abi.events().count()
    );

    store.insert_abi(name, &abi).await?;
    info!("Added ABI {} from {}", name, path.display());

    Ok(abi)
}

/// Loads every requested ABI, failing with the full list of missing names.
pub async fn load_abis(
    store: &impl AbiStore,
    names: &[String],
) -> Result<Vec<StoredAbi>, BackfillError> {
    let found = store.fetch_abis(names).await?;

    let missing: Vec<String> = names
        .iter()
        .filter(|name| !found.iter().any(|abi| &abi.name == *name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(BackfillError::AbisNotInDb(missing));
    }

    Ok(names
        .iter()
        .filter_map(|name| found.iter().find(|abi| &abi.name == name).cloned())
        .collect())
}
