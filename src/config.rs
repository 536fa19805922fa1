use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default = "default_dlq_stream")]
    pub dlq_stream: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_consumer")]
    pub consumer: String,
}

fn default_stream() -> String {
    "bridging_events".to_string()
}

fn default_dlq_stream() -> String {
    "bridging_events_dlq".to_string()
}

fn default_group() -> String {
    "bridging_events_group".to_string()
}

fn default_consumer() -> String {
    "bridge-relay-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    /// WebSocket endpoint of the chain node; the watcher needs a
    /// subscription-capable transport.
    pub ws_url: String,
    pub contract_address: String,
    /// Optional topic0 override. When absent the watcher filters on the
    /// SocketBridge event signature hash.
    pub topic0: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurrencyConfig {
    pub symbol: String,
    /// Power-of-ten divisor applied to the stored smallest-unit amount.
    pub factor: i32,
    pub label: String,
}

// ============================================================
// Currency registry
// ============================================================

/// Resolved currency entry used to build the read query.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyEntry {
    pub factor: i32,
    pub label: String,
}

/// Immutable symbol -> {factor, label} lookup, injected into the store at
/// construction. Unknown or empty symbols resolve to the WEI default.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    entries: HashMap<String, CurrencyEntry>,
}

impl CurrencyRegistry {
    pub fn from_config(currencies: &[CurrencyConfig]) -> Self {
        if currencies.is_empty() {
            return Self::default();
        }

        let entries = currencies
            .iter()
            .map(|c| {
                (
                    c.symbol.to_uppercase(),
                    CurrencyEntry {
                        factor: c.factor,
                        label: c.label.clone(),
                    },
                )
            })
            .collect();

        Self { entries }
    }

    /// Case-insensitive lookup. Empty or unsupported symbols fall back to
    /// raw smallest-unit amounts labelled "WEI".
    pub fn resolve(&self, symbol: &str) -> CurrencyEntry {
        self.entries
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_else(Self::default_entry)
    }

    pub fn default_entry() -> CurrencyEntry {
        CurrencyEntry {
            factor: 1,
            label: "WEI".to_string(),
        }
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        let mut entries = HashMap::new();
        for (symbol, factor) in [("ETH", 18), ("USDT", 16), ("DAI", 18), ("BTC", 18)] {
            entries.insert(
                symbol.to_string(),
                CurrencyEntry {
                    factor,
                    label: symbol.to_string(),
                },
            );
        }
        Self { entries }
    }
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if !self.chain.ws_url.starts_with("ws://") && !self.chain.ws_url.starts_with("wss://") {
            return Err(eyre::eyre!(
                "Chain ws_url '{}' must be a ws:// or wss:// endpoint",
                self.chain.ws_url
            ));
        }
        if !self.chain.contract_address.starts_with("0x")
            || self.chain.contract_address.len() != 42
        {
            return Err(eyre::eyre!(
                "Invalid contract address '{}'",
                self.chain.contract_address
            ));
        }
        if let Some(topic) = &self.chain.topic0 {
            if !topic.starts_with("0x") || topic.len() != 66 {
                return Err(eyre::eyre!("Invalid topic0 '{}'", topic));
            }
        }
        if self.redis.stream == self.redis.dlq_stream {
            return Err(eyre::eyre!(
                "Stream and dead-letter stream must be distinct ('{}')",
                self.redis.stream
            ));
        }
        for currency in &self.currencies {
            if currency.factor < 0 {
                return Err(eyre::eyre!(
                    "Currency '{}' has a negative factor",
                    currency.symbol
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[database]
url = "postgres://localhost/bridge"
max_connections = 5

[redis]
url = "redis://localhost:6379"

[chain]
ws_url = "wss://mainnet.example/ws"
contract_address = "0x3a23F943181408EAC424116Af7b7790c94Cb97a5"

[[currencies]]
symbol = "ETH"
factor = 18
label = "ETH"
"#;

    #[test]
    fn test_parse_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.redis.stream, "bridging_events"); // default
        assert_eq!(config.redis.dlq_stream, "bridging_events_dlq"); // default
        assert_eq!(config.server.port, 3000); // default
        assert_eq!(config.currencies.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_contract_address() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.chain.contract_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_http_ws_url() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.chain.ws_url = "http://mainnet.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_dlq_must_differ() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.redis.dlq_stream = config.redis.stream.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_resolves_case_insensitively() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let registry = CurrencyRegistry::from_config(&config.currencies);

        let entry = registry.resolve("eth");
        assert_eq!(entry.factor, 18);
        assert_eq!(entry.label, "ETH");
    }

    #[test]
    fn test_registry_unknown_falls_back_to_wei() {
        let registry = CurrencyRegistry::from_config(&[]);

        for symbol in ["", "UNKNOWN", "doge"] {
            let entry = registry.resolve(symbol);
            assert_eq!(entry.factor, 1);
            assert_eq!(entry.label, "WEI");
        }
    }

    #[test]
    fn test_registry_builtin_defaults() {
        let registry = CurrencyRegistry::from_config(&[]);
        assert_eq!(registry.resolve("ETH").factor, 18);
        assert_eq!(registry.resolve("USDT").factor, 16);
    }
}
