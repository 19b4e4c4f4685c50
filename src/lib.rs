// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

#![warn(missing_docs)]

//! This is ccatok
//!
//! The token layer of a PKCS#11 provider backed by an IBM CCA
//! coprocessor. Keys live in the coprocessor as opaque key tokens, this
//! crate classifies and builds those tokens, bridges them to PKCS#11
//! attribute templates and drives the CCA verbs for every operation.

use std::sync::Arc;

mod attribute;
mod config;
mod curves;
mod error;
mod hash;
mod hsm;
mod keytoken;
mod kvs;
mod mechanism;
mod misc;
mod template;

#[cfg(feature = "log")]
mod log;

mod cipher;
mod digest;
mod ec;
mod hmac;
mod native;
mod object;
mod rng;
mod rsa;
mod secret;
mod wrap;

pub mod pkcs11;

pub use attribute::{attr_name, AttrType, Attribute};
pub use config::Config;
pub use curves::{CurveDescriptor, CurveFamily, CURVES};
pub use digest::DigestOperation;
pub use error::{Error, ErrorKind, Result};
pub use hmac::HmacOperation;
pub use hsm::{
    HsmCapabilities, HsmClient, HsmReply, HsmStatus, RuleArray,
    CHAIN_VECTOR_SIZE, KEY_ID_SIZE,
};
pub use keytoken::{KeyToken, TokenKind};
pub use mechanism::{CkMechanism, MechParams};
pub use native::hmac::SoftHmac;
pub use template::Template;

use hsm::HsmCapabilities as Caps;
use mechanism::MECHANISMS;
use pkcs11::*;

/// The CCA token
///
/// Every operation goes through the injected [HsmClient], the token
/// itself keeps no state besides its configuration.
#[derive(Debug, Clone)]
pub struct Cca {
    hsm: Arc<dyn HsmClient>,
    config: Config,
}

impl Cca {
    /// Creates a token around an HSM binding
    pub fn new(hsm: Arc<dyn HsmClient>, config: Config) -> Cca {
        Cca {
            hsm: hsm,
            config: config,
        }
    }

    /// Creates a token using the configuration file found in the
    /// environment, if any
    pub fn with_defaults(hsm: Arc<dyn HsmClient>) -> Result<Cca> {
        Ok(Cca::new(hsm, Config::default_config()?))
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn hsm(&self) -> &dyn HsmClient {
        self.hsm.as_ref()
    }

    /// Whether HMAC keys are processed by the HSM HMAC verbs
    pub fn native_hmac(&self) -> bool {
        self.config.hsm.native_hmac
            && self.hsm.capabilities().contains(Caps::NATIVE_HMAC)
    }

    /// Mechanisms implemented by this token
    pub fn mechanism_list(&self) -> Vec<CK_MECHANISM_TYPE> {
        MECHANISMS.list()
    }

    /// Key size limits and flags of a mechanism
    pub fn mechanism_info(
        &self,
        mech: CK_MECHANISM_TYPE,
    ) -> Result<&'static CK_MECHANISM_INFO> {
        MECHANISMS.info(mech)
    }
}

#[cfg(test)]
mod tests;
