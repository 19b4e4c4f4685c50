// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! DES, AES and HMAC secret keys

use crate::error::Result;
use crate::hash::MAX_HMAC_KEY_BITS;
use crate::hsm::{RuleArray, KEY_ID_SIZE};
use crate::keytoken::{KeyToken, TokenKind};
use crate::object::{has_key_token, key_token};
use crate::pkcs11::*;
use crate::template::Template;
use crate::{trace_debug, trace_error, Cca};

/// Size of the payload CCA stores for an HMAC key of `key_bits` bits
fn hmac_payload_bits(key_bits: usize) -> usize {
    (((key_bits + 32) + 63) & !63) + 320
}

/// Replaces CKA_VALUE with zeros of the same length, the old value is
/// wiped when dropped
fn blank_value(tmpl: &mut Template, len: usize) {
    tmpl.set_bytes(CKA_VALUE, &vec![0u8; len]);
}

fn check_hmac_key_bits(bits: usize) -> Result<()> {
    if bits < 80 || bits > MAX_HMAC_KEY_BITS {
        trace_error!("HMAC key size of {} bits not within 80-2048", bits);
        return Err(CKR_KEY_SIZE_RANGE)?;
    }
    Ok(())
}

fn value_len(tmpl: &Template) -> usize {
    match tmpl.find(CKA_VALUE) {
        Some(a) => a.get_value().len(),
        None => 0,
    }
}

impl Cca {
    pub(crate) fn import_symmetric_key(
        &self,
        tmpl: &mut Template,
        key_type: CK_KEY_TYPE,
    ) -> Result<()> {
        if has_key_token(tmpl) {
            return self.refresh_symmetric_key(tmpl, key_type);
        }
        let ret = self.import_clear_symmetric_key(tmpl, key_type);
        let len = value_len(tmpl);
        blank_value(tmpl, len);
        ret
    }

    /// The template already carries a key token, CKA_VALUE is only a
    /// placeholder that reflects the key size
    fn refresh_symmetric_key(
        &self,
        tmpl: &mut Template,
        key_type: CK_KEY_TYPE,
    ) -> Result<()> {
        let data = key_token(tmpl)?.to_vec();
        let token = KeyToken::classify(&data)?;
        let expected = match key_type {
            CKK_DES => Some(64),
            CKK_DES3 => Some(192),
            CKK_AES => None,
            _ => {
                trace_debug!("Unsupported key type {:#x}", key_type);
                return Err(CKR_KEY_FUNCTION_NOT_PERMITTED)?;
            }
        };
        match (token.kind(), expected) {
            (TokenKind::DesData, Some(bits)) if token.bits() == bits => (),
            (TokenKind::AesData, None) => (),
            (TokenKind::AesCipher, None) => {
                trace_error!("CCA AES cipher key import is not supported");
                return Err(CKR_TEMPLATE_INCONSISTENT)?;
            }
            (kind, _) => {
                trace_error!(
                    "Key token {:?} of {} bits does not match key type {:#x}",
                    kind,
                    token.bits(),
                    key_type
                );
                return Err(CKR_TEMPLATE_INCONSISTENT)?;
            }
        }
        blank_value(tmpl, token.bits() / 8);
        tmpl.set_bool(CKA_SENSITIVE, true);
        Ok(())
    }

    fn import_clear_symmetric_key(
        &self,
        tmpl: &mut Template,
        key_type: CK_KEY_TYPE,
    ) -> Result<()> {
        let (keyword, sizes): (&str, &[usize]) = match key_type {
            CKK_AES => ("AES", &[16, 24, 32]),
            CKK_DES => ("DES", &[8]),
            CKK_DES3 => ("DES", &[16, 24]),
            _ => return Err(CKR_KEY_FUNCTION_NOT_PERMITTED)?,
        };
        let len = tmpl.get_non_empty(CKA_VALUE)?.len();
        if !sizes.contains(&len) {
            trace_error!(
                "Clear key of {} bytes is invalid for key type {:#x}",
                len,
                key_type
            );
            return Err(CKR_KEY_SIZE_RANGE)?;
        }
        let value = tmpl.get_sensitive(CKA_VALUE)?;
        let key_id = self
            .hsm()
            .clear_key_import(&RuleArray::from_keywords(&[keyword]), &value)
            .or_failed("CSNBCKM (CLEAR KEY IMPORT)")?;
        if key_id.len() != KEY_ID_SIZE {
            trace_error!("Unexpected key identifier size {}", key_id.len());
            return Err(CKR_FUNCTION_FAILED)?;
        }
        tmpl.set_bytes(CKA_IBM_OPAQUE, &key_id);
        Ok(())
    }

    pub(crate) fn import_generic_secret_key(
        &self,
        tmpl: &mut Template,
    ) -> Result<()> {
        let len = match tmpl.find(CKA_VALUE) {
            Some(a) => a.get_value().len(),
            None => {
                trace_error!("Incomplete Generic Secret (HMAC) key template");
                return Err(CKR_TEMPLATE_INCOMPLETE)?;
            }
        };
        if !self.native_hmac() && !has_key_token(tmpl) {
            return self.keep_clear_hmac_key(tmpl, len * 8);
        }
        let ret = self.import_hmac_key(tmpl, len * 8);
        blank_value(tmpl, len);
        ret
    }

    /// Without the HMAC verbs the key stays in CKA_VALUE for the
    /// software implementation
    fn keep_clear_hmac_key(
        &self,
        tmpl: &mut Template,
        bits: usize,
    ) -> Result<()> {
        check_hmac_key_bits(bits)?;
        trace_debug!("HMAC key kept in clear for the software fallback");
        tmpl.set_bool(CKA_SENSITIVE, true);
        Ok(())
    }

    fn import_hmac_key(&self, tmpl: &mut Template, bits: usize) -> Result<()> {
        check_hmac_key_bits(bits)?;

        if has_key_token(tmpl) {
            let data = key_token(tmpl)?.to_vec();
            let token = KeyToken::classify(&data)?;
            if token.kind() != TokenKind::Hmac {
                trace_error!("Key token does not match CKK_GENERIC_SECRET");
                return Err(CKR_TEMPLATE_INCONSISTENT)?;
            }
            if hmac_payload_bits(bits) != token.bits() {
                trace_error!("HMAC token payload size and key size differ");
                return Err(CKR_TEMPLATE_INCONSISTENT)?;
            }
            tmpl.set_bool(CKA_SENSITIVE, true);
            return Ok(());
        }

        let value = tmpl.get_sensitive(CKA_VALUE)?;
        let rules = RuleArray::from_keywords(&[
            "INTERNAL", "NO-KEY", "HMAC", "MAC", "GENERATE",
        ]);
        let skeleton = self
            .hsm()
            .key_token_build2(&rules)
            .or_failed("CSNBKTB2 (HMAC KEY TOKEN BUILD)")?;

        let rules = RuleArray::from_keywords(&["HMAC", "FIRST", "MIN1PART"]);
        let partial = self
            .hsm()
            .key_part_import2(&rules, &value, bits, &skeleton)
            .or_failed("CSNBKPI2 (HMAC KEY IMPORT FIRST)")?;

        let rules = RuleArray::from_keywords(&["HMAC", "COMPLETE"]);
        let complete = self
            .hsm()
            .key_part_import2(&rules, &[], 0, &partial)
            .or_failed("CSNBKPI2 (HMAC KEY IMPORT COMPLETE)")?;

        tmpl.set_bytes(CKA_IBM_OPAQUE, &complete);
        Ok(())
    }

    /// Generates a single (8 bytes) or triple (24 bytes) length DES
    /// key, returning its key identifier
    pub fn des_key_gen(&self, len: usize) -> Result<Vec<u8>> {
        let key_length = match len {
            8 => "KEYLN8",
            24 => "KEYLN24",
            _ => {
                trace_error!("Invalid key length: {}", len);
                return Err(CKR_KEY_SIZE_RANGE)?;
            }
        };
        let skeleton = [0u8; KEY_ID_SIZE];
        self.hsm()
            .key_generate("OP", key_length, "DATA", "", &skeleton)
            .or_failed("CSNBKGN (KEYGEN)")
    }

    /// Generates an AES data key of 16, 24 or 32 bytes, returning its
    /// key identifier
    pub fn aes_key_gen(&self, len: usize) -> Result<Vec<u8>> {
        let (rule, key_length) = match len {
            16 => ("KEYLN16", "KEYLN16"),
            24 => ("KEYLN24", "KEYLN24"),
            32 => ("KEYLN32", ""),
            _ => {
                trace_error!("Invalid key length: {}", len);
                return Err(CKR_KEY_SIZE_RANGE)?;
            }
        };
        let rules =
            RuleArray::from_keywords(&["INTERNAL", "AES", "NO-KEY", rule]);
        let skeleton = self
            .hsm()
            .key_token_build(&rules, "DATA")
            .or_failed("CSNBKTB (TOKEN BUILD)")?;
        self.hsm()
            .key_generate("OP", key_length, "AESTOKEN", "", &skeleton)
            .or_failed("CSNBKGN (KEYGEN)")
    }

    /// Generates an HMAC key of CKA_VALUE_LEN bytes into `tmpl`
    pub fn generic_secret_key_gen(&self, tmpl: &mut Template) -> Result<()> {
        let len = match tmpl.get_ulong(CKA_VALUE_LEN) {
            Ok(l) => usize::try_from(l)?,
            Err(e) => {
                trace_error!("CKA_VALUE_LEN missing in (HMAC) key template");
                return Err(e);
            }
        };
        if len < 80 / 8 || len > 2048 / 8 {
            trace_error!(
                "HMAC key size of {} bits not within CCA required range",
                len * 8
            );
            return Err(CKR_KEY_SIZE_RANGE)?;
        }

        let rules =
            RuleArray::from_keywords(&["INTERNAL", "HMAC", "MAC", "GENERATE"]);
        let skeleton = self
            .hsm()
            .key_token_build2(&rules)
            .or_failed("CSNBKTB2 (HMAC KEY TOKEN BUILD)")?;

        let rules = RuleArray::from_keywords(&["HMAC", "OP"]);
        let token = self
            .hsm()
            .key_generate2(&rules, len * 8, "TOKEN", "", &skeleton)
            .or_failed("CSNBKGN2 (HMAC KEY GENERATE)")?;

        tmpl.set_bytes(CKA_IBM_OPAQUE, &token);
        Ok(())
    }
}
