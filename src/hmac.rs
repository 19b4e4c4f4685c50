// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

//! HMAC sign and verify with CCA HMAC key tokens
//!
//! The HSM path drives CSNBHMG/CSNBHMV with the same block aligned
//! streaming as the digest operation. When the HMAC verbs are not
//! available the clear key value is handed to [SoftHmac].

use std::sync::Arc;

use crate::digest::{BlockStream, Phase};
use crate::error::{Error, Result};
use crate::hash::{hmac_op, HashBasedOp, MAX_HASH_SIZE};
use crate::hsm::{HsmClient, HsmStatus, RuleArray, CHAIN_VECTOR_SIZE};
use crate::keytoken::{KeyToken, TokenKind};
use crate::mechanism::{CkMechanism, MechParams};
use crate::native::hmac::SoftHmac;
use crate::object::key_token;
use crate::pkcs11::*;
use crate::template::Template;
use crate::{trace_debug, trace_error, Cca};

fn hmv_error(status: HsmStatus) -> Error {
    if status.is(4, 429) || status.is(4, 1) {
        Error::hsm(CKR_SIGNATURE_INVALID, status)
    } else {
        Error::hsm(CKR_FUNCTION_FAILED, status)
    }
}

/// Output length selected by the mechanism, the _GENERAL variants
/// carry it as parameter
fn mac_len(mech: &CkMechanism) -> Result<(&'static HashBasedOp, usize)> {
    let (op, general) = hmac_op(mech.mechanism)?;
    if !general {
        return Ok((op, op.hash_size));
    }
    match mech.params {
        MechParams::MacLength(len) => {
            let len = usize::try_from(len)?;
            if len == 0 || len > op.hash_size {
                trace_error!("Invalid HMAC output length {}", len);
                return Err(CKR_MECHANISM_PARAM_INVALID)?;
            }
            Ok((op, len))
        }
        _ => Err(CKR_MECHANISM_PARAM_INVALID)?,
    }
}

#[derive(Debug)]
struct HsmMac {
    hsm: Arc<dyn HsmClient>,
    op: &'static HashBasedOp,
    key: Vec<u8>,
    stream: BlockStream,
    chain_vector: [u8; CHAIN_VECTOR_SIZE],
}

impl HsmMac {
    fn rules(op: &HashBasedOp, phase: Phase) -> RuleArray {
        RuleArray::from_keywords(&["HMAC", op.keyword, phase.keyword()])
    }

    fn update(&mut self, data: &[u8], sign: bool) -> Result<()> {
        let hsm = self.hsm.as_ref();
        let op = self.op;
        let key = self.key.as_slice();
        let chain_vector = &mut self.chain_vector;
        self.stream.update(data, |phase, block| {
            let rules = Self::rules(op, phase);
            let mut scratch = [0u8; MAX_HASH_SIZE];
            let mac = &mut scratch[..op.hash_size];
            if sign {
                hsm.hmac_generate(&rules, key, block, chain_vector, mac)
                    .or_failed("CSNBHMG (HMAC SIGN UPDATE)")
            } else {
                hsm.hmac_verify(&rules, key, block, chain_vector, mac)
                    .or_failed("CSNBHMV (HMAC VERIFY UPDATE)")
            }
        })
    }

    fn sign_final(&mut self, mac: &mut [u8]) -> Result<()> {
        let hsm = self.hsm.as_ref();
        let op = self.op;
        let key = self.key.as_slice();
        let chain_vector = &mut self.chain_vector;
        self.stream.finish(|phase, tail| {
            let rules = Self::rules(op, phase);
            hsm.hmac_generate(&rules, key, tail, chain_vector, mac)
                .or_failed("CSNBHMG (HMAC GENERATE)")
        })
    }

    fn verify_final(&mut self, mac: &[u8]) -> Result<()> {
        let hsm = self.hsm.as_ref();
        let op = self.op;
        let key = self.key.as_slice();
        let chain_vector = &mut self.chain_vector;
        self.stream.finish(|phase, tail| {
            let rules = Self::rules(op, phase);
            hsm.hmac_verify(&rules, key, tail, chain_vector, mac)
                .check("CSNBHMV (HMAC VERIFY)")
                .map_err(hmv_error)
        })
    }
}

#[derive(Debug)]
enum MacEngine {
    Hsm(HsmMac),
    Soft(SoftHmac),
}

/// An HMAC sign or verify operation
#[derive(Debug)]
pub struct HmacOperation {
    mech: CK_MECHANISM_TYPE,
    mac_len: usize,
    sign: bool,
    engine: MacEngine,
    in_use: bool,
    finalized: bool,
}

impl HmacOperation {
    /// The HMAC mechanism
    pub fn mechanism(&self) -> CK_MECHANISM_TYPE {
        self.mech
    }

    /// Length of the MAC produced or expected
    pub fn mac_len(&self) -> usize {
        self.mac_len
    }

    /// Whether the operation is over, successfully or not
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// Bytes held back until a full block or the final call
    pub fn tail_len(&self) -> usize {
        match &self.engine {
            MacEngine::Hsm(m) => m.stream.tail_len(),
            MacEngine::Soft(s) => s.tail_len(),
        }
    }

    /// Whether the operation runs on the HSM HMAC verbs
    pub fn is_native(&self) -> bool {
        match self.engine {
            MacEngine::Hsm(_) => true,
            MacEngine::Soft(_) => false,
        }
    }

    fn check_active(&self, sign: bool) -> Result<()> {
        if self.finalized {
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        if self.sign != sign {
            trace_error!("HMAC operation used in the wrong direction");
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        Ok(())
    }

    /// Feeds more data, empty chunks are ignored
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        self.in_use = true;
        let ret = match &mut self.engine {
            MacEngine::Hsm(m) => m.update(data, self.sign),
            MacEngine::Soft(s) => s.update(data),
        };
        if ret.is_err() {
            self.finalized = true;
        }
        ret
    }

    /// Completes a signature and returns the MAC length
    pub fn sign_final(&mut self, mac: &mut [u8]) -> Result<usize> {
        self.check_active(true)?;
        if mac.len() < self.mac_len {
            return Err(Error::buffer_too_small(self.mac_len));
        }
        self.finalized = true;
        let out = &mut mac[..self.mac_len];
        match &mut self.engine {
            MacEngine::Hsm(m) => m.sign_final(out)?,
            MacEngine::Soft(s) => s.sign_final(out)?,
        }
        Ok(self.mac_len)
    }

    /// Completes a verification against `mac`
    pub fn verify_final(&mut self, mac: &[u8]) -> Result<()> {
        self.check_active(false)?;
        if mac.len() != self.mac_len {
            trace_error!(
                "Signature length {} does not match {}",
                mac.len(),
                self.mac_len
            );
            return Err(CKR_SIGNATURE_LEN_RANGE)?;
        }
        self.finalized = true;
        match &mut self.engine {
            MacEngine::Hsm(m) => m.verify_final(mac),
            MacEngine::Soft(s) => s.verify_final(mac),
        }
    }

    fn check_one_shot(&self) -> Result<()> {
        if self.in_use {
            return Err(CKR_OPERATION_ACTIVE)?;
        }
        Ok(())
    }

    /// One-shot HMAC of `data`
    pub fn sign(&mut self, data: &[u8], mac: &mut [u8]) -> Result<usize> {
        self.check_active(true)?;
        self.check_one_shot()?;
        if mac.len() < self.mac_len {
            return Err(Error::buffer_too_small(self.mac_len));
        }
        self.update(data)?;
        self.sign_final(mac)
    }

    /// One-shot verification of `mac` over `data`
    pub fn verify(&mut self, data: &[u8], mac: &[u8]) -> Result<()> {
        self.check_active(false)?;
        self.check_one_shot()?;
        if mac.len() != self.mac_len {
            return Err(CKR_SIGNATURE_LEN_RANGE)?;
        }
        self.update(data)?;
        self.verify_final(mac)
    }
}

impl Cca {
    fn hmac_init(
        &self,
        mech: &CkMechanism,
        key: &Template,
        sign: bool,
    ) -> Result<HmacOperation> {
        let (op, len) = mac_len(mech)?;
        match key.get_ulong(CKA_KEY_TYPE) {
            Ok(CKK_GENERIC_SECRET) => (),
            Ok(_) => return Err(CKR_KEY_TYPE_INCONSISTENT)?,
            Err(e) => return Err(e),
        }

        let engine = if self.native_hmac() {
            let token = key_token(key)?;
            if KeyToken::classify(token)?.kind() != TokenKind::Hmac {
                trace_error!("Key token is not an HMAC key");
                return Err(CKR_KEY_TYPE_INCONSISTENT)?;
            }
            MacEngine::Hsm(HsmMac {
                hsm: self.hsm.clone(),
                op: op,
                key: token.to_vec(),
                stream: BlockStream::new(op.block_size),
                chain_vector: [0u8; CHAIN_VECTOR_SIZE],
            })
        } else {
            trace_debug!("Using the software HMAC implementation");
            let value = key.get_sensitive(CKA_VALUE)?;
            MacEngine::Soft(SoftHmac::new(self.hsm.clone(), op.hash, &value)?)
        };

        Ok(HmacOperation {
            mech: mech.mechanism,
            mac_len: len,
            sign: sign,
            engine: engine,
            in_use: false,
            finalized: false,
        })
    }

    /// Starts an HMAC signature with a generic secret key
    pub fn sign_init(
        &self,
        mech: &CkMechanism,
        key: &Template,
    ) -> Result<HmacOperation> {
        self.hmac_init(mech, key, true)
    }

    /// Starts an HMAC verification with a generic secret key
    pub fn verify_init(
        &self,
        mech: &CkMechanism,
        key: &Template,
    ) -> Result<HmacOperation> {
        self.hmac_init(mech, key, false)
    }
}
