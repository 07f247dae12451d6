//! Settlement networks a payee can be paid on

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Syntax: VariantName => (is_testnet, [canonical_name, aliases...])
macro_rules! define_networks {
    ($(
        $variant:ident => ($is_testnet:expr, [$first_name:expr $(, $other_names:expr)* $(,)?])
    ),+ $(,)?) => {
        /// Supported settlement networks.
        #[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum Network {
            $(
                #[serde(rename = $first_name $(, alias = $other_names)*)]
                $variant,
            )+
        }

        impl Network {
            /// All valid names/aliases (first is canonical, used for Display)
            pub fn names(&self) -> &'static [&'static str] {
                match self {
                    $( Network::$variant => &[$first_name $(, $other_names)*], )+
                }
            }

            /// Check if this is a testnet
            pub fn is_testnet(&self) -> bool {
                match self {
                    $( Network::$variant => $is_testnet, )+
                }
            }

            /// Return all known [`Network`] variants.
            pub fn variants() -> &'static [Network] {
                &[ $( Network::$variant ),+ ]
            }
        }
    };
}

define_networks! {
    Base            => (false, ["base", "Base"]),
    Ethereum        => (false, ["ethereum", "eth", "Ethereum"]),
    Polygon         => (false, ["polygon", "Polygon"]),
    Solana          => (false, ["solana", "Solana"]),
    World           => (false, ["world", "world-chain", "World"]),

    BaseSepolia     => (true, ["base-sepolia", "BaseSepolia"]),
    EthereumSepolia => (true, ["ethereum-sepolia", "sepolia", "EthereumSepolia"]),
    PolygonAmoy     => (true, ["polygon-amoy", "PolygonAmoy"]),
    SolanaDevnet    => (true, ["solana-devnet", "SolanaDevnet"]),
    WorldSepolia    => (true, ["world-sepolia", "WorldSepolia"]),
}

impl Network {
    /// Get the primary name (first in names array, kebab-case)
    pub fn name(&self) -> &'static str {
        self.names()[0]
    }

    /// Parse a network name string (supports all aliases, case-insensitive)
    pub fn parse(s: &str) -> Option<Network> {
        Self::variants()
            .iter()
            .copied()
            .find(|network| network.names().iter().any(|name| name.eq_ignore_ascii_case(s)))
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network '{0}'")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::parse(s).ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!(Network::parse("Base"), Some(Network::Base));
        assert_eq!(Network::parse("base"), Some(Network::Base));
        assert_eq!(Network::parse("BASE-SEPOLIA"), Some(Network::BaseSepolia));
        assert_eq!(Network::parse("sepolia"), Some(Network::EthereumSepolia));
        assert!(Network::parse("invalid").is_none());
    }

    #[test]
    fn test_is_testnet() {
        assert!(Network::BaseSepolia.is_testnet());
        assert!(!Network::Base.is_testnet());
        assert!(Network::SolanaDevnet.is_testnet());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(Network::Base.to_string(), "base");
        assert_eq!(serde_json::to_string(&Network::WorldSepolia).unwrap(), "\"world-sepolia\"");
        let parsed: Network = serde_json::from_str("\"eth\"").unwrap();
        assert_eq!(parsed, Network::Ethereum);
    }

    #[test]
    fn test_from_str_error() {
        let err = "moonchain".parse::<Network>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown network 'moonchain'");
    }
}
