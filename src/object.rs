// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Key objects handed to the token
//!
//! A key object either already carries a CCA key token in
//! CKA_IBM_OPAQUE, or carries clear key material that must be imported
//! into one. Objects that are not keys are left alone.

use crate::error::Result;
use crate::keytoken::{KeyToken, TokenKind};
use crate::pkcs11::*;
use crate::template::Template;
use crate::{trace_debug, trace_error, Cca};

/// Returns the key token of a key object
pub fn key_token(key: &Template) -> Result<&[u8]> {
    match key.get_non_empty(CKA_IBM_OPAQUE) {
        Ok(t) => Ok(t),
        Err(e) => {
            trace_error!("Could not find CKA_IBM_OPAQUE for the key");
            Err(e)
        }
    }
}

/// Whether the object carries a key token, which takes precedence over
/// any clear key material in the same template
pub fn has_key_token(tmpl: &Template) -> bool {
    match tmpl.find(CKA_IBM_OPAQUE) {
        Some(a) => !a.is_empty(),
        None => false,
    }
}

/// Classifies the key token of `tmpl` and checks it is of `kind`
///
/// The token bytes are returned as an owned copy so the caller can keep
/// updating the template while inspecting the token.
pub fn expect_token(tmpl: &Template, kind: TokenKind) -> Result<Vec<u8>> {
    let data = key_token(tmpl)?.to_vec();
    let found = KeyToken::classify(&data)?.kind();
    if found != kind {
        trace_error!(
            "Key token of type {:?} does not match key type {:?}",
            found,
            kind
        );
        return Err(CKR_TEMPLATE_INCONSISTENT)?;
    }
    Ok(data)
}

impl Cca {
    /// Prepares a new object for storage
    ///
    /// Key objects either get their public attributes refreshed from
    /// the supplied key token, or get their clear key material imported
    /// into a new key token stored in CKA_IBM_OPAQUE. Clear key material
    /// is wiped from the template in both cases.
    pub fn object_add(&self, obj: &mut Template) -> Result<()> {
        let key_type = match obj.get_ulong(CKA_KEY_TYPE) {
            Ok(k) => k,
            Err(_) => {
                trace_debug!("object not a key, no need to import");
                return Ok(());
            }
        };
        let class = match obj.get_ulong(CKA_CLASS) {
            Ok(c) => c,
            Err(_) => {
                trace_error!("object has no CKA_CLASS value");
                return Err(CKR_TEMPLATE_INCOMPLETE)?;
            }
        };

        match (key_type, class) {
            (CKK_RSA, CKO_PUBLIC_KEY) => self.import_rsa_public_key(obj),
            (CKK_RSA, CKO_PRIVATE_KEY) => self.import_rsa_private_key(obj),
            (CKK_EC, CKO_PUBLIC_KEY) => self.import_ec_public_key(obj),
            (CKK_EC, CKO_PRIVATE_KEY) => self.import_ec_private_key(obj),
            (CKK_RSA, _) | (CKK_EC, _) => Err(CKR_KEY_TYPE_INCONSISTENT)?,
            (CKK_AES, _) | (CKK_DES, _) | (CKK_DES3, _) => {
                self.import_symmetric_key(obj, key_type)
            }
            (CKK_GENERIC_SECRET, _) => self.import_generic_secret_key(obj),
            _ => {
                trace_error!("Unknown/unsupported key type {:#x}", key_type);
                Err(CKR_KEY_FUNCTION_NOT_PERMITTED)?
            }
        }
    }
}
