// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::env;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::map_err;
use crate::pkcs11::*;

use serde::{Deserialize, Serialize};
use toml;

#[cfg(not(test))]
const DEFAULT_CONF_DIR: &str = {
    match option_env!("CONFDIR") {
        Some(p) => p,
        None => "/usr/local/etc",
    }
};
#[cfg(test)]
const DEFAULT_CONF_DIR: &str = "test";

/// File name looked up in each configuration directory
pub const DEFAULT_CONF_NAME: &str = "token.conf";

/// Largest request the CSNBRNGL verb accepts in one call
pub const MAX_RNG_CHUNK: usize = 8192;

/// The `[hsm]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hsm {
    /// Use the HSM HMAC verbs for HMAC keys, when false the clear
    /// CKA_VALUE is processed with the software implementation
    pub native_hmac: bool,
    /// Bytes requested per CSNBRNGL call, clamped to [MAX_RNG_CHUNK]
    pub rng_chunk: usize,
}

impl Default for Hsm {
    fn default() -> Hsm {
        Hsm {
            native_hmac: true,
            rng_chunk: MAX_RNG_CHUNK,
        }
    }
}

/// The `[limits]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest RSA result in bytes
    pub max_rsa_output: usize,
    /// Largest ECDSA signature in bytes
    pub max_ec_signature: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_rsa_output: 512,
            max_ec_signature: 132,
        }
    }
}

/// Token configuration, read from `token.conf`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HSM usage
    pub hsm: Hsm,
    /// Output size caps
    pub limits: Limits,
}

impl Config {
    /// The defaults
    pub fn new() -> Config {
        Config::default()
    }

    /// Locates the configuration file, the first existing candidate
    /// wins
    pub fn find_conf() -> Result<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("CCATOK_CONF") {
            return Ok(var);
        }
        let mut candidates = Vec::new();
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            candidates.push(format!("{}/ccatok/{}", xdg, DEFAULT_CONF_NAME));
        }
        if let Ok(home) = env::var("HOME") {
            candidates.push(format!(
                "{}/.config/ccatok/{}",
                home, DEFAULT_CONF_NAME
            ));
        }
        let system =
            format!("{}/ccatok/{}", DEFAULT_CONF_DIR, DEFAULT_CONF_NAME);
        candidates.push(system);
        match candidates.into_iter().find(|c| Path::new(c).is_file()) {
            Some(conffile) => Ok(conffile),
            None => Err(CKR_ARGUMENTS_BAD)?,
        }
    }

    /// Parses a TOML document, missing keys take their defaults
    pub fn from_toml(config_str: &str) -> Result<Config> {
        let conf: Config =
            map_err!(toml::from_str(config_str), CKR_TOKEN_NOT_RECOGNIZED)?;
        Ok(conf)
    }

    /// Reads and parses a TOML file
    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        Self::from_toml(&config_str)
    }

    /// Loads the configuration file if one can be found, otherwise
    /// returns the defaults. A file that fails to parse is an error.
    pub fn default_config() -> Result<Config> {
        match Self::find_conf() {
            Ok(filename) => Self::from_file(&filename),
            Err(_) => Ok(Config::new()),
        }
    }

    /// The effective random request size
    pub fn rng_chunk(&self) -> usize {
        self.hsm.rng_chunk.clamp(1, MAX_RNG_CHUNK)
    }
}
