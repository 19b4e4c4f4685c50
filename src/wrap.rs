// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Transport of DES and AES keys under RSA keys

use crate::error::Result;
use crate::hsm::RuleArray;
use crate::keytoken::{KeyToken, TokenKind};
use crate::mechanism::CkMechanism;
use crate::misc::copy_out;
use crate::object::key_token;
use crate::pkcs11::*;
use crate::rsa::oaep_hash_keyword;
use crate::template::Template;
use crate::{trace_debug, trace_error, Cca};

/// Rule array for CSNDSYX/CSNDSYI, `None` when the key type cannot be
/// transported
fn transport_rules(
    mech: &CkMechanism,
    key_type: CK_KEY_TYPE,
) -> Result<Option<RuleArray>> {
    let algorithm = match key_type {
        CKK_DES | CKK_DES2 | CKK_DES3 => "DES",
        CKK_AES => "AES",
        _ => return Ok(None),
    };
    let rules = match mech.mechanism {
        CKM_RSA_PKCS => RuleArray::from_keywords(&[algorithm, "PKCS-1.2"]),
        CKM_RSA_PKCS_OAEP => {
            let hash = oaep_hash_keyword(mech)?;
            RuleArray::from_keywords(&[algorithm, "PKCSOAEP", hash])
        }
        _ => return Err(CKR_MECHANISM_INVALID)?,
    };
    Ok(Some(rules))
}

fn check_rsa_key(
    key: &Template,
    class: CK_OBJECT_CLASS,
    err: CK_RV,
) -> Result<()> {
    let key_class = key.get_ulong(CKA_CLASS)?;
    let key_type = key.get_ulong(CKA_KEY_TYPE)?;
    if key_class != class || key_type != CKK_RSA {
        return Err(err)?;
    }
    Ok(())
}

/// Key type and length in bytes of an unwrapped symmetric key token
fn unwrapped_key_type(token: &[u8]) -> Result<(CK_KEY_TYPE, usize)> {
    let token = match KeyToken::classify(token) {
        Ok(t) => t,
        Err(_) => {
            trace_debug!("key token invalid");
            return Err(CKR_FUNCTION_FAILED)?;
        }
    };
    match (token.kind(), token.bits()) {
        (TokenKind::DesData, 64) => Ok((CKK_DES, 8)),
        (TokenKind::DesData, 128) => Ok((CKK_DES2, 16)),
        (TokenKind::DesData, 192) => Ok((CKK_DES3, 24)),
        (TokenKind::AesData, bits) => Ok((CKK_AES, bits / 8)),
        _ => {
            trace_debug!("key token invalid");
            Err(CKR_FUNCTION_FAILED)?
        }
    }
}

impl Cca {
    /// Exports a DES or AES key encrypted under an RSA public key
    ///
    /// An `output` too short, including an empty one, fails with the
    /// required size.
    pub fn wrap_key(
        &self,
        mech: &CkMechanism,
        wrapping_key: &Template,
        key: &Template,
        output: &mut [u8],
    ) -> Result<usize> {
        if mech.mechanism != CKM_RSA_PKCS
            && mech.mechanism != CKM_RSA_PKCS_OAEP
        {
            return Err(CKR_MECHANISM_INVALID)?;
        }
        check_rsa_key(
            wrapping_key,
            CKO_PUBLIC_KEY,
            CKR_WRAPPING_KEY_TYPE_INCONSISTENT,
        )?;

        match key.get_ulong(CKA_CLASS) {
            Ok(CKO_SECRET_KEY) => (),
            Ok(_) => return Err(CKR_KEY_NOT_WRAPPABLE)?,
            Err(e) => {
                trace_error!("Could not find CKA_CLASS for the key");
                return Err(e);
            }
        }
        let key_type = key.get_ulong(CKA_KEY_TYPE)?;
        let rules = match transport_rules(mech, key_type)? {
            Some(r) => r,
            None => return Err(CKR_KEY_NOT_WRAPPABLE)?,
        };

        let source = key_token(key)?;
        let transport = key_token(wrapping_key)?;
        let wrapped = self
            .hsm()
            .symmetric_key_export(&rules, source, transport)
            .or_failed("CSNDSYX (SYMMETRIC KEY EXPORT)")?;
        copy_out(&wrapped, output)
    }

    /// Imports a DES or AES key encrypted under an RSA private key into
    /// the secret key template `tmpl`
    pub fn unwrap_key(
        &self,
        mech: &CkMechanism,
        unwrapping_key: &Template,
        wrapped: &[u8],
        tmpl: &mut Template,
    ) -> Result<()> {
        if mech.mechanism != CKM_RSA_PKCS
            && mech.mechanism != CKM_RSA_PKCS_OAEP
        {
            return Err(CKR_MECHANISM_INVALID)?;
        }
        check_rsa_key(
            unwrapping_key,
            CKO_PRIVATE_KEY,
            CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT,
        )?;

        if tmpl.get_ulong(CKA_CLASS)? != CKO_SECRET_KEY {
            return Err(CKR_UNWRAPPING_KEY_TYPE_INCONSISTENT)?;
        }
        let key_type = tmpl.get_ulong(CKA_KEY_TYPE)?;
        let rules = match transport_rules(mech, key_type)? {
            Some(r) => r,
            None => return Err(CKR_WRAPPED_KEY_INVALID)?,
        };

        let transport = key_token(unwrapping_key)?;
        let token = self
            .hsm()
            .symmetric_key_import(&rules, wrapped, transport)
            .or_failed("CSNDSYI (SYMMETRIC KEY IMPORT)")?;

        let (found, key_size) = unwrapped_key_type(&token)?;
        if found != key_type {
            trace_debug!("Wrong key type");
            return Err(CKR_FUNCTION_FAILED)?;
        }

        tmpl.set_bytes(CKA_IBM_OPAQUE, &token);
        tmpl.set_bytes(CKA_VALUE, &vec![0u8; key_size]);
        /* CSNDSYI only yields DES and AES data tokens */
        if key_type == CKK_AES {
            tmpl.set_ulong(CKA_VALUE_LEN, key_size as CK_ULONG);
        }

        tmpl.set_bool(CKA_LOCAL, false);
        tmpl.set_bool(CKA_ALWAYS_SENSITIVE, false);
        tmpl.set_bool(CKA_SENSITIVE, false);
        tmpl.set_bool(CKA_EXTRACTABLE, true);
        tmpl.set_bool(CKA_NEVER_EXTRACTABLE, false);
        Ok(())
    }
}
