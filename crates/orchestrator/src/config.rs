use std::{fmt, path::Path, time::Duration};

use libexo_core::{
    error::ExoError,
    types::{Address, Bytes, U256},
};
use libexo_jsonrpc::config::JsonRpcConfig;
use libexo_periphery::helper::compile_helper;
use libexo_utils::config::Config;
use libexo_wallet::{account::Account, fee::FeePolicy};

pub static CONFIG_SECTION: &str = "exploit";

/// The `[exploit]` section.
///
/// Keys are camelCase in the file. The lowercase and snake_case spellings are
/// accepted too since environment overrides arrive lowercased.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct ExploitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(
        default,
        rename = "signingKey",
        alias = "signingkey",
        alias = "signing_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_key: Option<String>,

    #[serde(
        default,
        rename = "gatewayAddress",
        alias = "gatewayaddress",
        alias = "gateway_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub gateway_address: Option<String>,

    #[serde(
        default,
        rename = "vaultAddress",
        alias = "vaultaddress",
        alias = "vault_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub vault_address: Option<String>,

    #[serde(
        default = "default_receipt_timeout_secs",
        rename = "receiptTimeoutSecs",
        alias = "receipttimeoutsecs",
        alias = "receipt_timeout_secs"
    )]
    pub receipt_timeout_secs: u64,

    #[serde(
        default = "default_poll_interval_millis",
        rename = "pollIntervalMillis",
        alias = "pollintervalmillis",
        alias = "poll_interval_millis"
    )]
    pub poll_interval_millis: u64,

    #[serde(
        default = "default_priority_fee_gwei",
        rename = "priorityFeeGwei",
        alias = "priorityfeegwei",
        alias = "priority_fee_gwei"
    )]
    pub priority_fee_gwei: u64,

    /// Extra value sent to the helper on top of the vault's deposit cap.
    #[serde(
        default = "default_helper_buffer_wei",
        rename = "helperBufferWei",
        alias = "helperbufferwei",
        alias = "helper_buffer_wei"
    )]
    pub helper_buffer_wei: u64,

    #[serde(
        default = "default_max_tier",
        rename = "maxTier",
        alias = "maxtier",
        alias = "max_tier"
    )]
    pub max_tier: u64,

    /// Receipt waits after the first timeout before a still-pending
    /// transaction is reported as unresolved.
    #[serde(
        default = "default_max_pending_rechecks",
        rename = "maxPendingRechecks",
        alias = "maxpendingrechecks",
        alias = "max_pending_rechecks"
    )]
    pub max_pending_rechecks: u32,

    /// Hex init code of the helper. Compiled from the bundled source if unset.
    #[serde(
        default,
        rename = "helperBytecode",
        alias = "helperbytecode",
        alias = "helper_bytecode",
        skip_serializing_if = "Option::is_none"
    )]
    pub helper_bytecode: Option<String>,

    #[serde(
        default = "default_solc_version",
        rename = "solcVersion",
        alias = "solcversion",
        alias = "solc_version"
    )]
    pub solc_version: String,
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_millis() -> u64 {
    2_000
}

fn default_priority_fee_gwei() -> u64 {
    2
}

fn default_helper_buffer_wei() -> u64 {
    // 0.01 ether
    10_000_000_000_000_000
}

fn default_max_tier() -> u64 {
    5
}

fn default_max_pending_rechecks() -> u32 {
    3
}

fn default_solc_version() -> String {
    "0.8.19".to_string()
}

impl Default for ExploitConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            signing_key: None,
            gateway_address: None,
            vault_address: None,
            receipt_timeout_secs: default_receipt_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            priority_fee_gwei: default_priority_fee_gwei(),
            helper_buffer_wei: default_helper_buffer_wei(),
            max_tier: default_max_tier(),
            max_pending_rechecks: default_max_pending_rechecks(),
            helper_bytecode: None,
            solc_version: default_solc_version(),
        }
    }
}

impl Config for ExploitConfig {
    fn section_name() -> &'static str {
        CONFIG_SECTION
    }
}

impl fmt::Debug for ExploitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExploitConfig")
            .field("endpoint", &self.endpoint)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("gateway_address", &self.gateway_address)
            .field("vault_address", &self.vault_address)
            .field("receipt_timeout_secs", &self.receipt_timeout_secs)
            .field("poll_interval_millis", &self.poll_interval_millis)
            .field("priority_fee_gwei", &self.priority_fee_gwei)
            .field("helper_buffer_wei", &self.helper_buffer_wei)
            .field("max_tier", &self.max_tier)
            .field("max_pending_rechecks", &self.max_pending_rechecks)
            .field("solc_version", &self.solc_version)
            .finish_non_exhaustive()
    }
}

/// Where the helper's init code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperCode {
    Bytecode(Bytes),
    Compile { solc_version: String },
}

impl HelperCode {
    pub fn resolve(&self) -> Result<Bytes, ExoError> {
        match self {
            HelperCode::Bytecode(code) if code.is_empty() => {
                Err(ExoError::Config("helper bytecode is empty".to_string()))
            }
            HelperCode::Bytecode(code) => Ok(code.clone()),
            HelperCode::Compile { solc_version } => compile_helper(solc_version),
        }
    }
}

/// Knobs of a run with defaults for everything.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
    pub fee_policy: FeePolicy,
    pub helper_buffer: U256,
    pub max_tier: U256,
    pub max_pending_rechecks: u32,
    pub helper_code: HelperCode,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(default_receipt_timeout_secs()),
            poll_interval: Duration::from_millis(default_poll_interval_millis()),
            fee_policy: FeePolicy::from_gwei(default_priority_fee_gwei()),
            helper_buffer: U256::from(default_helper_buffer_wei()),
            max_tier: U256::from(default_max_tier()),
            max_pending_rechecks: default_max_pending_rechecks(),
            helper_code: HelperCode::Compile {
                solc_version: default_solc_version(),
            },
        }
    }
}

/// A validated [`ExploitConfig`].
#[derive(Debug)]
pub struct ExploitSettings {
    pub endpoint: String,
    pub account: Account,
    pub gateway: Address,
    pub vault: Address,
    pub tunables: Tunables,
}

impl ExploitSettings {
    pub fn rpc_config(&self) -> JsonRpcConfig {
        JsonRpcConfig {
            url: self.endpoint.clone(),
            poll_interval_millis: self.tunables.poll_interval.as_millis() as u64,
        }
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ExoError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| ExoError::Config(format!("{}: invalid address {:?}: {}", key, value, e)))
}

impl ExploitConfig {
    /// Load the section from `file`, or from `EXO_CONFIG` / `config.toml`.
    pub fn load_section(file: Option<&Path>) -> Result<Self, ExoError> {
        match file {
            Some(file) => Self::load_from(file),
            None => Self::load(),
        }
    }

    /// Check required keys and parse every value.
    pub fn resolve(&self) -> Result<ExploitSettings, ExoError> {
        let required = [
            ("endpoint", &self.endpoint),
            ("signingKey", &self.signing_key),
            ("gatewayAddress", &self.gateway_address),
            ("vaultAddress", &self.vault_address),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(ExoError::Config(format!(
                "missing required key(s) in [{}]: {}",
                CONFIG_SECTION,
                missing.join(", ")
            )));
        }

        let endpoint = self.endpoint.clone().unwrap_or_default();
        let account = Account::from_secret(self.signing_key.as_deref().unwrap_or_default())?;
        let gateway = parse_address(
            "gatewayAddress",
            self.gateway_address.as_deref().unwrap_or_default(),
        )?;
        let vault = parse_address(
            "vaultAddress",
            self.vault_address.as_deref().unwrap_or_default(),
        )?;

        if self.receipt_timeout_secs == 0 {
            return Err(ExoError::Config(
                "receiptTimeoutSecs must be positive".to_string(),
            ));
        }
        let helper_code = match &self.helper_bytecode {
            Some(code) => {
                let code = code.trim();
                let raw = hex::decode(code.strip_prefix("0x").unwrap_or(code))
                    .map_err(|e| {
                        ExoError::Config(format!("helperBytecode: invalid hex: {}", e))
                    })?;
                if raw.is_empty() {
                    return Err(ExoError::Config("helperBytecode is empty".to_string()));
                }
                HelperCode::Bytecode(Bytes::from(raw))
            }
            None => HelperCode::Compile {
                solc_version: self.solc_version.clone(),
            },
        };

        Ok(ExploitSettings {
            endpoint,
            account,
            gateway,
            vault,
            tunables: Tunables {
                receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
                poll_interval: Duration::from_millis(self.poll_interval_millis),
                fee_policy: FeePolicy::from_gwei(self.priority_fee_gwei),
                helper_buffer: U256::from(self.helper_buffer_wei),
                max_tier: U256::from(self.max_tier),
                max_pending_rechecks: self.max_pending_rechecks,
                helper_code,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use libexo_core::{
        error::ExoError,
        types::{Address, Bytes, GWEI, U256},
    };
    use libexo_utils::config::Config;
    use tempfile::NamedTempFile;

    use super::{ExploitConfig, HelperCode};

    const KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn write_config(txt: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(txt.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_and_resolve() {
        let file = write_config(&format!(
            r#"
            [exploit]
            endpoint = "http://127.0.0.1:8545"
            signingKey = "{}"
            gatewayAddress = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            vaultAddress = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
            priorityFeeGwei = 3
            helperBytecode = "0x6080"
            "#,
            KEY
        ));
        let cfg = ExploitConfig::load_from(file.path()).unwrap();
        let settings = cfg.resolve().unwrap();
        assert_eq!(settings.endpoint, "http://127.0.0.1:8545");
        assert_eq!(
            settings.account.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
        assert_eq!(settings.tunables.fee_policy.priority_fee, 3 * GWEI);
        assert_eq!(settings.tunables.receipt_timeout, Duration::from_secs(120));
        assert_eq!(settings.tunables.max_tier, U256::from(5));
        assert_eq!(
            settings.tunables.helper_buffer,
            U256::from(10_000_000_000_000_000u64)
        );
        assert_eq!(
            settings.tunables.helper_code,
            HelperCode::Bytecode(Bytes::from(vec![0x60, 0x80]))
        );
        assert_eq!(settings.rpc_config().poll_interval_millis, 2_000);
    }

    #[test]
    fn test_missing_keys_are_reported_together() {
        let file = write_config(
            r#"
            [exploit]
            endpoint = "http://127.0.0.1:8545"
            "#,
        );
        let cfg = ExploitConfig::load_from(file.path()).unwrap();
        let Err(ExoError::Config(msg)) = cfg.resolve() else {
            panic!("expected a configuration error")
        };
        assert!(msg.contains("signingKey"));
        assert!(msg.contains("gatewayAddress"));
        assert!(msg.contains("vaultAddress"));
        assert!(!msg.contains("endpoint"));
    }

    #[test]
    fn test_missing_section_is_config_error() {
        let file = write_config("[log]\nconsole_level = \"debug\"\n");
        assert!(matches!(
            ExploitConfig::load_section(Some(file.path())),
            Err(ExoError::Config(_))
        ));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let base = ExploitConfig {
            endpoint: Some("http://127.0.0.1:8545".to_string()),
            signing_key: Some(KEY.to_string()),
            gateway_address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string()),
            vault_address: Some("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".to_string()),
            ..Default::default()
        };
        assert!(base.resolve().is_ok());

        let bad_key = ExploitConfig {
            signing_key: Some("0x1234".to_string()),
            ..base.clone()
        };
        assert!(matches!(bad_key.resolve(), Err(ExoError::Config(_))));

        let bad_addr = ExploitConfig {
            vault_address: Some("vault".to_string()),
            ..base.clone()
        };
        assert!(matches!(bad_addr.resolve(), Err(ExoError::Config(_))));

        let bad_code = ExploitConfig {
            helper_bytecode: Some("0xzz".to_string()),
            ..base
        };
        assert!(matches!(bad_code.resolve(), Err(ExoError::Config(_))));
    }

    #[test]
    fn test_signing_key_is_not_printed() {
        let cfg = ExploitConfig {
            signing_key: Some(KEY.to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains(&KEY[2..]));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_section_name() {
        assert_eq!(ExploitConfig::section_name(), "exploit");
    }
}
