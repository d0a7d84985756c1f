use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use eyre::{Context, Result, ensure};
use log::debug;
use std::fmt;

const ERC20_ABI: &str = include_str!("../abi/ERC20.json");

sol!(
    #[sol(rpc)]
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
);

/// ERC20 token constants, either read from the chain or filled with test values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ERC20Token {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub address: Address,
}

impl ERC20Token {
    /// Queries `name()`, `symbol()` and `decimals()` from the token contract.
    pub async fn from_chain(provider: &impl Provider, address: Address) -> Result<Self> {
        let contract = IERC20::new(address, provider);

        let name = contract
            .name()
            .call()
            .await
            .wrap_err(format!("Failed to fetch name of token {}", address))?;
        let symbol = contract
            .symbol()
            .call()
            .await
            .wrap_err(format!("Failed to fetch symbol of token {}", address))?;
        let decimals = contract
            .decimals()
            .call()
            .await
            .wrap_err(format!("Failed to fetch decimals of token {}", address))?;
        debug!("Token {} is {} ({}), {} decimals", address, name, symbol, decimals);

        Ok(Self {
            name,
            symbol,
            decimals,
            address,
        })
    }

    /// Placeholder token used when initializing an empty test pool.
    ///
    /// `token_number` must be a single digit; it is repeated to form the address.
    pub fn default_token(token_number: u8) -> Result<Self> {
        ensure!(
            token_number <= 9,
            "Default token number must be a single digit, got {}",
            token_number
        );
        Ok(Self {
            name: format!("Default Token {token_number}"),
            symbol: format!("TKN{token_number}"),
            decimals: 18,
            address: Address::repeat_byte(token_number * 0x11),
        })
    }

    pub fn abi() -> Result<JsonAbi> {
        serde_json::from_str(ERC20_ABI).wrap_err("Bundled ERC20 ABI is invalid")
    }

    pub fn abi_json() -> &'static str {
        ERC20_ABI
    }

    /// Raw on-chain amount divided by `10^decimals`.
    pub fn convert_decimals(&self, raw_token_amount: U256) -> f64 {
        let raw: f64 = raw_token_amount.into();
        raw / 10f64.powi(self.decimals as i32)
    }

    pub fn human_readable(&self, raw_token_amount: U256) -> String {
        format!("{} {}", self.convert_decimals(raw_token_amount), self.symbol)
    }
}

impl fmt::Display for ERC20Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name:     {}", self.name)?;
        writeln!(f, "Symbol:   {}", self.symbol)?;
        writeln!(f, "Decimals: {}", self.decimals)?;
        write!(f, "Address:  {}", self.address)
    }
}
