//! Well-known Stellar networks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkPreset {
    /// Human-readable label for this network.
    pub name: String,
    /// Public Soroban RPC endpoint, when the network has one.
    pub rpc_url: Option<String>,
    /// Passphrase mixed into every transaction hash.
    pub network_passphrase: String,
}

pub fn testnet() -> NetworkPreset {
    NetworkPreset {
        name: "Testnet".to_string(),
        rpc_url: Some("https://soroban-testnet.stellar.org".to_string()),
        network_passphrase: "Test SDF Network ; September 2015".to_string(),
    }
}

pub fn futurenet() -> NetworkPreset {
    NetworkPreset {
        name: "Futurenet".to_string(),
        rpc_url: Some("https://rpc-futurenet.stellar.org".to_string()),
        network_passphrase: "Test SDF Future Network ; October 2022".to_string(),
    }
}

/// SDF runs no public mainnet RPC; pick a provider and set `rpc_url`.
pub fn mainnet() -> NetworkPreset {
    NetworkPreset {
        name: "Mainnet".to_string(),
        rpc_url: None,
        network_passphrase: "Public Global Stellar Network ; September 2015".to_string(),
    }
}

/// The `stellar/quickstart` container in local mode.
pub fn local() -> NetworkPreset {
    NetworkPreset {
        name: "Local".to_string(),
        rpc_url: Some("http://localhost:8000/soroban/rpc".to_string()),
        network_passphrase: "Standalone Network ; February 2017".to_string(),
    }
}

/// Resolve a preset name to the corresponding `NetworkPreset`.
///
/// Recognised names (case-insensitive):
/// - `"testnet"` / `"test"`
/// - `"futurenet"` / `"future"`
/// - `"mainnet"` / `"public"` / `"pubnet"`
/// - `"local"` / `"standalone"`
pub fn resolve_preset(name: &str) -> Option<NetworkPreset> {
    match name.trim().to_lowercase().as_str() {
        "testnet" | "test" => Some(testnet()),
        "futurenet" | "future" => Some(futurenet()),
        "mainnet" | "public" | "pubnet" => Some(mainnet()),
        "local" | "standalone" => Some(local()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_preset_case_insensitive() {
        assert_eq!(resolve_preset("TESTNET"), Some(testnet()));
        assert_eq!(resolve_preset("Future"), Some(futurenet()));
        assert_eq!(resolve_preset(" pubnet "), Some(mainnet()));
        assert_eq!(resolve_preset("standalone"), Some(local()));
        assert!(resolve_preset("unknown").is_none());
    }

    #[test]
    fn test_passphrases_are_distinct() {
        let presets = [testnet(), futurenet(), mainnet(), local()];
        for (i, a) in presets.iter().enumerate() {
            for b in &presets[i + 1..] {
                assert_ne!(a.network_passphrase, b.network_passphrase);
            }
        }
    }

    #[test]
    fn test_mainnet_has_no_default_rpc() {
        assert!(mainnet().rpc_url.is_none());
        assert!(testnet().rpc_url.is_some());
    }
}
