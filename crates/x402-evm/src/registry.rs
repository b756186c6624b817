//! Chain and token registry.
//!
//! A read-only two-map registry built once at startup from static defaults
//! plus per-network RPC URL environment overrides. It is the only surface
//! through which the verifier, settler, and confirmer touch a chain: it
//! vends a read-only public client and a wallet client (bound to the
//! facilitator signing key) per network.

use std::collections::HashMap;
use std::env;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{
    fillers::{
        BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
    },
    Identity, ProviderBuilder, RootProvider,
};
use alloy::signers::local::PrivateKeySigner;
use url::Url;

use crate::error::FacilitatorError;

/// Read-only per-network client.
pub type PublicClient = RootProvider;

/// Concrete provider type from `ProviderBuilder::new().wallet(...).connect_http(...)`.
pub type WalletClient = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

#[derive(Debug, Clone)]
pub struct NetworkRecord {
    pub slug: String,
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub required_confirmations: u64,
    pub default_token: String,
}

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub symbol: String,
    pub decimals: u8,
    pub supports_eip3009: bool,
    /// network slug -> contract address. A `(network, token)` pair is
    /// supported iff this map contains the network slug.
    pub addresses: HashMap<String, Address>,
}

struct NetworkDefault {
    slug: &'static str,
    name: &'static str,
    chain_id: u64,
    rpc_env: &'static str,
    rpc_fallback: &'static str,
    required_confirmations: u64,
    default_token: &'static str,
}

const NETWORK_DEFAULTS: &[NetworkDefault] = &[
    NetworkDefault {
        slug: "base-sepolia",
        name: "Base Sepolia",
        chain_id: 84532,
        rpc_env: "BASE_SEPOLIA_RPC_URL",
        rpc_fallback: "https://sepolia.base.org",
        required_confirmations: 1,
        default_token: "usdc",
    },
    NetworkDefault {
        slug: "base-mainnet",
        name: "Base",
        chain_id: 8453,
        rpc_env: "BASE_MAINNET_RPC_URL",
        rpc_fallback: "https://mainnet.base.org",
        required_confirmations: 2,
        default_token: "usdc",
    },
    NetworkDefault {
        slug: "ethereum-sepolia",
        name: "Ethereum Sepolia",
        chain_id: 11155111,
        rpc_env: "ETHEREUM_SEPOLIA_RPC_URL",
        rpc_fallback: "https://ethereum-sepolia-rpc.publicnode.com",
        required_confirmations: 1,
        default_token: "usdc",
    },
    NetworkDefault {
        slug: "ethereum-mainnet",
        name: "Ethereum",
        chain_id: 1,
        rpc_env: "ETHEREUM_MAINNET_RPC_URL",
        rpc_fallback: "https://ethereum-rpc.publicnode.com",
        required_confirmations: 3,
        default_token: "usdc",
    },
    NetworkDefault {
        slug: "0g-mainnet",
        name: "0G",
        chain_id: 16661,
        rpc_env: "ZG_MAINNET_RPC_URL",
        rpc_fallback: "https://evmrpc.0g.ai",
        required_confirmations: 1,
        default_token: "w0g",
    },
    NetworkDefault {
        slug: "0g-testnet",
        name: "0G Galileo",
        chain_id: 16601,
        rpc_env: "ZG_TESTNET_RPC_URL",
        rpc_fallback: "https://evmrpc-testnet.0g.ai",
        required_confirmations: 1,
        default_token: "w0g",
    },
    NetworkDefault {
        slug: "skale-base-sepolia",
        name: "SKALE Base Sepolia",
        chain_id: 1444673419,
        rpc_env: "SKALE_BASE_SEPOLIA_RPC_URL",
        rpc_fallback: "https://testnet.skalenodes.com/v1/juicy-low-small-testnet",
        required_confirmations: 1,
        default_token: "usdc",
    },
];

struct TokenDefault {
    symbol: &'static str,
    decimals: u8,
    supports_eip3009: bool,
    addresses: &'static [(&'static str, &'static str)],
}

const TOKEN_DEFAULTS: &[TokenDefault] = &[
    TokenDefault {
        symbol: "usdc",
        decimals: 6,
        supports_eip3009: true,
        addresses: &[
            ("base-sepolia", "0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
            ("base-mainnet", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            ("ethereum-sepolia", "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
            ("ethereum-mainnet", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            ("skale-base-sepolia", "0x2e83f5a0c4d17b6e98aa01f3d5b2c4e6a7f09813"),
        ],
    },
    TokenDefault {
        symbol: "w0g",
        decimals: 18,
        supports_eip3009: false,
        addresses: &[
            ("0g-mainnet", "0x9f0c83d1b4a7e65f20d9c4b8aa13e7065cd2f481"),
            ("0g-testnet", "0x4c61b88ef30d27a95b1fe0443a9ad66e02c57d12"),
        ],
    },
];

pub struct Registry {
    networks: Vec<NetworkRecord>,
    tokens: Vec<TokenRecord>,
    public_clients: HashMap<String, PublicClient>,
    wallet_clients: HashMap<String, WalletClient>,
    facilitator_address: Address,
}

impl Registry {
    /// Build the registry from static defaults plus env RPC overrides and
    /// connect clients for every network. Fails fast on any malformed entry.
    pub fn from_env(signer: PrivateKeySigner) -> Result<Self, FacilitatorError> {
        let tokens: Vec<TokenRecord> = TOKEN_DEFAULTS
            .iter()
            .map(|t| {
                let addresses = t
                    .addresses
                    .iter()
                    .map(|(network, hex)| {
                        let addr: Address = hex.parse().map_err(|e| {
                            FacilitatorError::Config(format!(
                                "invalid {} address for {network}: {e}",
                                t.symbol
                            ))
                        })?;
                        Ok((network.to_string(), addr))
                    })
                    .collect::<Result<HashMap<_, _>, FacilitatorError>>()?;
                Ok(TokenRecord {
                    symbol: t.symbol.to_string(),
                    decimals: t.decimals,
                    supports_eip3009: t.supports_eip3009,
                    addresses,
                })
            })
            .collect::<Result<_, FacilitatorError>>()?;

        let mut networks = Vec::with_capacity(NETWORK_DEFAULTS.len());
        for n in NETWORK_DEFAULTS {
            let rpc_url = env::var(n.rpc_env).unwrap_or_else(|_| n.rpc_fallback.to_string());
            if rpc_url.is_empty() {
                return Err(FacilitatorError::Config(format!(
                    "missing RPC URL for network {} (set {})",
                    n.slug, n.rpc_env
                )));
            }
            if n.required_confirmations == 0 {
                return Err(FacilitatorError::Config(format!(
                    "network {} must require at least one confirmation",
                    n.slug
                )));
            }
            let default_supported = tokens
                .iter()
                .any(|t| t.symbol == n.default_token && t.addresses.contains_key(n.slug));
            if !default_supported {
                return Err(FacilitatorError::Config(format!(
                    "default token {} has no address on network {}",
                    n.default_token, n.slug
                )));
            }
            networks.push(NetworkRecord {
                slug: n.slug.to_string(),
                name: n.name.to_string(),
                chain_id: n.chain_id,
                rpc_url,
                required_confirmations: n.required_confirmations,
                default_token: n.default_token.to_string(),
            });
        }

        Self::connect(networks, tokens, signer)
    }

    fn connect(
        networks: Vec<NetworkRecord>,
        tokens: Vec<TokenRecord>,
        signer: PrivateKeySigner,
    ) -> Result<Self, FacilitatorError> {
        let facilitator_address = signer.address();
        let mut public_clients = HashMap::with_capacity(networks.len());
        let mut wallet_clients = HashMap::with_capacity(networks.len());

        for network in &networks {
            let url: Url = network.rpc_url.parse().map_err(|e| {
                FacilitatorError::Config(format!(
                    "invalid RPC URL for network {}: {e}",
                    network.slug
                ))
            })?;
            public_clients.insert(network.slug.clone(), RootProvider::new_http(url.clone()));
            let wallet = ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer.clone()))
                .connect_http(url);
            wallet_clients.insert(network.slug.clone(), wallet);
        }

        Ok(Self {
            networks,
            tokens,
            public_clients,
            wallet_clients,
            facilitator_address,
        })
    }

    pub fn chain_of(&self, network: &str) -> Result<&NetworkRecord, FacilitatorError> {
        self.networks
            .iter()
            .find(|n| n.slug == network)
            .ok_or_else(|| FacilitatorError::UnsupportedNetwork(network.to_string()))
    }

    pub fn token_of(&self, symbol: &str) -> Result<&TokenRecord, FacilitatorError> {
        let symbol = symbol.to_lowercase();
        self.tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| FacilitatorError::UnsupportedAsset(symbol))
    }

    /// Resolve an asset given as either a token symbol or a contract address.
    pub fn token_for_asset(
        &self,
        network: &str,
        asset: &str,
    ) -> Result<&TokenRecord, FacilitatorError> {
        if asset.starts_with("0x") || asset.starts_with("0X") {
            let addr: Address = asset
                .parse()
                .map_err(|_| FacilitatorError::UnsupportedAsset(asset.to_string()))?;
            return self
                .tokens
                .iter()
                .find(|t| t.addresses.get(network) == Some(&addr))
                .ok_or_else(|| {
                    FacilitatorError::UnsupportedAsset(format!("{asset} on {network}"))
                });
        }
        let token = self.token_of(asset)?;
        if !token.addresses.contains_key(network) {
            return Err(FacilitatorError::UnsupportedAsset(format!(
                "{} on {network}",
                token.symbol
            )));
        }
        Ok(token)
    }

    pub fn address_of(&self, network: &str, symbol: &str) -> Result<Address, FacilitatorError> {
        let token = self.token_of(symbol)?;
        token.addresses.get(network).copied().ok_or_else(|| {
            FacilitatorError::UnsupportedAsset(format!("{} on {network}", token.symbol))
        })
    }

    pub fn confirmations_of(&self, network: &str) -> Result<u64, FacilitatorError> {
        Ok(self.chain_of(network)?.required_confirmations)
    }

    pub fn chain_id_of(&self, network: &str) -> Result<u64, FacilitatorError> {
        Ok(self.chain_of(network)?.chain_id)
    }

    /// Network slugs in declaration order.
    pub fn supported_networks(&self) -> Vec<&str> {
        self.networks.iter().map(|n| n.slug.as_str()).collect()
    }

    /// Token symbols supported on `network`, in declaration order.
    pub fn supported_assets(&self, network: &str) -> Vec<&str> {
        self.tokens
            .iter()
            .filter(|t| t.addresses.contains_key(network))
            .map(|t| t.symbol.as_str())
            .collect()
    }

    pub fn is_native(&self, network: &str, asset: &str) -> bool {
        self.token_for_asset(network, asset)
            .and_then(|t| self.address_of(network, &t.symbol))
            .map(|addr| addr == Address::ZERO)
            .unwrap_or(false)
    }

    pub fn networks(&self) -> &[NetworkRecord] {
        &self.networks
    }

    pub fn public_client(&self, network: &str) -> Result<&PublicClient, FacilitatorError> {
        self.public_clients
            .get(network)
            .ok_or_else(|| FacilitatorError::UnsupportedNetwork(network.to_string()))
    }

    pub fn wallet_client(&self, network: &str) -> Result<&WalletClient, FacilitatorError> {
        self.wallet_clients
            .get(network)
            .ok_or_else(|| FacilitatorError::UnsupportedNetwork(network.to_string()))
    }

    /// Address derived from the facilitator signing key. Relayer-mode payers
    /// must grant their allowance to this address.
    pub fn facilitator_address(&self) -> Address {
        self.facilitator_address
    }
}
