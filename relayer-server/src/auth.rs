//! Signing key resolution.
//!
//! Builds the wallet that signs mint transactions from the `[auth]` section.
//! Secrets may live inline, in a file, or in an environment variable, and
//! never appear in `Debug` output.

use crate::config::file::AuthConfig;
use ethers::signers::coins_bip39::English;
use ethers::signers::{LocalWallet, MnemonicBuilder, Signer, WalletError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable consulted when `kind = "private_key"` has no inline key.
pub const PRIVATE_KEY_ENV: &str = "RELAYER_AUTH_PRIVATE_KEY";
/// Environment variable consulted when `kind = "mnemonic"` has no inline phrase.
pub const MNEMONIC_ENV: &str = "RELAYER_AUTH_MNEMONIC";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no {0} configured")]
    Missing(&'static str),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid signing key: {0}")]
    Wallet(#[from] WalletError),
}

/// A string that is redacted from logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Build the signing wallet bound to `chain_id`.
pub fn build_wallet(auth: &AuthConfig, chain_id: u64) -> Result<LocalWallet, AuthError> {
    let wallet = match auth {
        AuthConfig::PrivateKey { private_key } => {
            let key = resolve_secret(private_key.as_ref(), PRIVATE_KEY_ENV, "private key")?;
            wallet_from_private_key(key.expose())?
        }
        AuthConfig::PrivateKeyFile { path } => wallet_from_private_key(read_secret(path)?.expose())?,
        AuthConfig::Mnemonic {
            mnemonic,
            account_index,
        } => {
            let phrase = resolve_secret(mnemonic.as_ref(), MNEMONIC_ENV, "mnemonic")?;
            wallet_from_mnemonic(phrase.expose(), *account_index)?
        }
        AuthConfig::MnemonicFile {
            path,
            account_index,
        } => wallet_from_mnemonic(read_secret(path)?.expose(), *account_index)?,
    };
    Ok(wallet.with_chain_id(chain_id))
}

fn resolve_secret(
    inline: Option<&Secret>,
    env: &str,
    what: &'static str,
) -> Result<Secret, AuthError> {
    if let Some(secret) = inline {
        return Ok(secret.clone());
    }
    std::env::var(env)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(Secret::new)
        .ok_or(AuthError::Missing(what))
}

fn read_secret(path: &Path) -> Result<Secret, AuthError> {
    std::fs::read_to_string(path)
        .map(|content| Secret::new(content.trim()))
        .map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Strip surrounding whitespace and a `0x`/`0X` prefix.
pub fn trim_hex(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

fn wallet_from_private_key(key: &str) -> Result<LocalWallet, AuthError> {
    Ok(LocalWallet::from_str(trim_hex(key))?)
}

fn wallet_from_mnemonic(phrase: &str, account_index: u32) -> Result<LocalWallet, AuthError> {
    let wallet = MnemonicBuilder::<English>::default()
        .phrase(phrase.trim())
        .index(account_index)?
        .build()?;
    Ok(wallet)
}
