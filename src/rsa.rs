// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! RSA keys and operations

use crate::error::{Error, Result};
use crate::hash;
use crate::hsm::{HsmStatus, RuleArray};
use crate::keytoken::{KeyToken, TokenKind};
use crate::kvs::{rsa_crt_kvs, rsa_generate_kvs, rsa_public_kvs, RsaCrtKey};
use crate::mechanism::{CkMechanism, MechParams};
use crate::misc::with_staging;
use crate::object::{expect_token, has_key_token, key_token};
use crate::pkcs11::*;
use crate::template::Template;
use crate::{trace_debug, trace_error, Cca};

use zeroize::Zeroizing;

/// Copies modulus and public exponent found in `token` into `tmpl`
fn publish_public_attrs(tmpl: &mut Template, token: &KeyToken) -> Result<()> {
    let n = token.rsa_modulus_vec()?;
    let e = token.rsa_public_exponent_vec()?;
    tmpl.set_bytes(CKA_MODULUS, &n);
    tmpl.set_bytes(CKA_PUBLIC_EXPONENT, &e);
    Ok(())
}

fn modulus_len(key: &[u8]) -> Result<usize> {
    let token = KeyToken::classify(key)?;
    match token.kind() {
        TokenKind::RsaPrivate | TokenKind::RsaPublic => {
            Ok((token.bits() + 7) / 8)
        }
        _ => Err(CKR_KEY_TYPE_INCONSISTENT)?,
    }
}

/// Maps a failed RSA signature verification
///
/// 4/429 is a bad signature. 8/72 is reported by CCA when the
/// signature is not smaller than the modulus, which a tampered
/// signature may well be, so it is treated the same way.
fn rsa_verify_error(status: HsmStatus) -> Error {
    if status.is(4, 429) || status.is(8, 72) {
        Error::hsm(CKR_SIGNATURE_INVALID, status)
    } else {
        Error::hsm(CKR_FUNCTION_FAILED, status)
    }
}

/// Checks OAEP parameters CCA can honor and returns the hash keyword
pub(crate) fn oaep_hash_keyword(mech: &CkMechanism) -> Result<&'static str> {
    let (hash, mgf, source, source_data) = match &mech.params {
        MechParams::Oaep {
            hash,
            mgf,
            source,
            source_data,
        } => (*hash, *mgf, *source, source_data),
        _ => return Err(CKR_MECHANISM_PARAM_INVALID)?,
    };
    if source == CKZ_DATA_SPECIFIED && !source_data.is_empty() {
        trace_error!("CCA does not support non-empty OAEP source data");
        return Err(CKR_MECHANISM_PARAM_INVALID)?;
    }
    let keyword = match hash {
        CKM_SHA_1 | CKM_SHA256 => hash::hash_op(hash)?.keyword,
        _ => return Err(CKR_MECHANISM_PARAM_INVALID)?,
    };
    if !hash::mgf_matches(hash, mgf) {
        return Err(CKR_MECHANISM_PARAM_INVALID)?;
    }
    Ok(keyword)
}

fn oaep_rules(mech: &CkMechanism) -> Result<RuleArray> {
    let keyword = oaep_hash_keyword(mech)?;
    Ok(RuleArray::from_keywords(&["PKCSOAEP", keyword]))
}

/// Rules and message for PSS, the message carries the salt length as
/// a 4 byte big endian prefix to the digest
fn pss_request(
    mech: &CkMechanism,
    digest: &[u8],
) -> Result<(RuleArray, Vec<u8>)> {
    let (hash, mgf, salt_len) = match &mech.params {
        MechParams::Pss {
            hash,
            mgf,
            salt_len,
        } => (*hash, *mgf, *salt_len),
        _ => return Err(CKR_MECHANISM_PARAM_INVALID)?,
    };
    let op = match hash::hash_op(hash) {
        Ok(op) => op,
        Err(_) => return Err(CKR_MECHANISM_PARAM_INVALID)?,
    };
    if !hash::mgf_matches(hash, mgf) {
        return Err(CKR_MECHANISM_PARAM_INVALID)?;
    }
    let slen = match u32::try_from(salt_len) {
        Ok(s) => s,
        Err(_) => return Err(CKR_MECHANISM_PARAM_INVALID)?,
    };
    let mut message = Vec::with_capacity(4 + digest.len());
    message.extend_from_slice(&slen.to_be_bytes());
    message.extend_from_slice(digest);
    Ok((RuleArray::from_keywords(&["PKCS-PSS", op.keyword]), message))
}

impl Cca {
    /// Generates an RSA key pair on the HSM
    ///
    /// CKA_MODULUS_BITS and the optional CKA_PUBLIC_EXPONENT come from
    /// the public template. Both templates receive the modulus, the
    /// public exponent and their own key token.
    pub fn rsa_generate_keypair(
        &self,
        pub_tmpl: &mut Template,
        priv_tmpl: &mut Template,
    ) -> Result<()> {
        let bits = match pub_tmpl.get_ulong(CKA_MODULUS_BITS) {
            Ok(b) => usize::try_from(b)?,
            Err(e) => {
                trace_error!("Could not find CKA_MODULUS_BITS for the key");
                return Err(e);
            }
        };
        let exponent = match pub_tmpl.get_non_empty(CKA_PUBLIC_EXPONENT) {
            Ok(e) => Some(e.to_vec()),
            Err(_) => None,
        };
        let kvs = rsa_generate_kvs(bits, exponent.as_deref())?;

        let rules = RuleArray::from_keywords(&["RSA-AESC", "KEY-MGMT"]);
        let skeleton = self
            .hsm()
            .pka_key_token_build(&rules, &kvs)
            .or_failed("CSNDPKB (RSA KEY TOKEN BUILD)")?;

        let rules = RuleArray::from_keywords(&["MASTER"]);
        let private = self
            .hsm()
            .pka_key_generate(&rules, &skeleton)
            .or_failed("CSNDPKG (RSA KEY GENERATE)")?;
        trace_debug!("RSA secure key token generated. size: {}", private.len());

        let public = self
            .hsm()
            .pka_public_key_extract(&RuleArray::new(), &private)
            .or_failed("CSNDPKX (PUBLIC KEY TOKEN EXTRACT)")?;
        trace_debug!("RSA public key token extracted. size: {}", public.len());

        let token = KeyToken::classify(&private)?;
        if token.kind() != TokenKind::RsaPrivate {
            return Err(CKR_FUNCTION_FAILED)?;
        }
        publish_public_attrs(priv_tmpl, &token)?;
        priv_tmpl.set_bytes(CKA_IBM_OPAQUE, &private);
        publish_public_attrs(pub_tmpl, &token)?;
        pub_tmpl.set_bytes(CKA_IBM_OPAQUE, &public);
        Ok(())
    }

    pub(crate) fn import_rsa_private_key(
        &self,
        tmpl: &mut Template,
    ) -> Result<()> {
        let ret = if has_key_token(tmpl) {
            self.refresh_rsa_private_key(tmpl)
        } else {
            self.import_clear_rsa_private_key(tmpl)
        };
        tmpl.cleanse_sensitive();
        ret
    }

    fn refresh_rsa_private_key(&self, tmpl: &mut Template) -> Result<()> {
        let data = expect_token(tmpl, TokenKind::RsaPrivate)?;
        let token = KeyToken::classify(&data)?;
        tmpl.set_bool(CKA_SENSITIVE, true);
        publish_public_attrs(tmpl, &token)?;
        /* the private exponent never leaves the HSM */
        tmpl.set_bytes(CKA_PRIVATE_EXPONENT, &[]);
        Ok(())
    }

    fn import_clear_rsa_private_key(&self, tmpl: &mut Template) -> Result<()> {
        let p = tmpl.get_sensitive(CKA_PRIME_1)?;
        let q = tmpl.get_sensitive(CKA_PRIME_2)?;
        let dp = tmpl.get_sensitive(CKA_EXPONENT_1)?;
        let dq = tmpl.get_sensitive(CKA_EXPONENT_2)?;
        let u = tmpl.get_sensitive(CKA_COEFFICIENT)?;
        let e = tmpl.get_non_empty(CKA_PUBLIC_EXPONENT)?.to_vec();
        let n = tmpl.get_non_empty(CKA_MODULUS)?.to_vec();

        let kvs = rsa_crt_kvs(&RsaCrtKey {
            modulus: &n,
            public_exponent: &e,
            prime_1: &p,
            prime_2: &q,
            exponent_1: &dp,
            exponent_2: &dq,
            coefficient: &u,
        })?;

        let rules = RuleArray::from_keywords(&["RSA-AESC", "KEY-MGMT"]);
        let clear = Zeroizing::new(
            self.hsm()
                .pka_key_token_build(&rules, &kvs)
                .or_failed("CSNDPKB (RSA KEY TOKEN BUILD RSA CRT)")?,
        );
        let wrapped = self
            .hsm()
            .pka_key_import(&RuleArray::new(), &clear)
            .or_failed("CSNDPKI (RSA KEY TOKEN IMPORT)")?;

        tmpl.set_bytes(CKA_IBM_OPAQUE, &wrapped);
        Ok(())
    }

    pub(crate) fn import_rsa_public_key(
        &self,
        tmpl: &mut Template,
    ) -> Result<()> {
        if has_key_token(tmpl) {
            let data = expect_token(tmpl, TokenKind::RsaPublic)?;
            let token = KeyToken::classify(&data)?;
            return publish_public_attrs(tmpl, &token);
        }

        let e = tmpl.get_non_empty(CKA_PUBLIC_EXPONENT)?.to_vec();
        let n = tmpl.get_non_empty(CKA_MODULUS)?.to_vec();
        let bits = usize::try_from(tmpl.get_ulong(CKA_MODULUS_BITS)?)?;
        let kvs = rsa_public_kvs(bits, &n, &e)?;

        let rules = RuleArray::from_keywords(&["RSA-PUBL"]);
        let public = self
            .hsm()
            .pka_key_token_build(&rules, &kvs)
            .or_failed("CSNDPKB (RSA KEY TOKEN BUILD RSA-PUBL)")?;
        tmpl.set_bytes(CKA_IBM_OPAQUE, &public);
        Ok(())
    }

    fn rsa_output_cap<'a>(&self, output: &'a mut [u8]) -> &'a mut [u8] {
        let max = self.config.limits.max_rsa_output;
        let cap = std::cmp::min(output.len(), max);
        &mut output[..cap]
    }

    fn pka_encrypt(
        &self,
        rules: &RuleArray,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let token = key_token(key)?;
        let need = modulus_len(token)?;
        let output = self.rsa_output_cap(output);
        with_staging(output, need, |out| {
            self.hsm()
                .pka_encrypt(rules, token, data, out)
                .or_failed("CSNDPKE (RSA ENCRYPT)")
        })
    }

    fn pka_decrypt(
        &self,
        rules: &RuleArray,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let token = key_token(key)?;
        let need = modulus_len(token)?;
        let output = self.rsa_output_cap(output);
        with_staging(output, need, |out| {
            self.hsm()
                .pka_decrypt(rules, token, data, out)
                .or_failed("CSNDPKD (RSA DECRYPT)")
        })
    }

    fn rsa_signature(
        &self,
        rules: &RuleArray,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let token = key_token(key)?;
        let need = modulus_len(token)?;
        let output = self.rsa_output_cap(output);
        if output.len() < need {
            return Err(Error::buffer_too_small(need));
        }
        self.hsm()
            .signature_generate(rules, token, data, output)
            .or_failed("CSNDDSG (RSA SIGN)")
    }

    fn rsa_signature_verify(
        &self,
        rules: &RuleArray,
        key: &Template,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let token = key_token(key)?;
        let cap = self.config.limits.max_rsa_output;
        let signature = &signature[..std::cmp::min(signature.len(), cap)];
        self.hsm()
            .signature_verify(rules, token, data, signature)
            .check("CSNDDSV (RSA VERIFY)")
            .map_err(rsa_verify_error)
    }

    /// PKCS#1 v1.5 encryption
    pub fn rsa_encrypt(
        &self,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let rules = RuleArray::from_keywords(&["PKCS-1.2"]);
        self.pka_encrypt(&rules, key, data, output)
    }

    /// PKCS#1 v1.5 decryption
    pub fn rsa_decrypt(
        &self,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let rules = RuleArray::from_keywords(&["PKCS-1.2"]);
        self.pka_decrypt(&rules, key, data, output)
    }

    /// OAEP encryption, SHA-1 and SHA-256 with the matching MGF1 only
    pub fn rsa_oaep_encrypt(
        &self,
        mech: &CkMechanism,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let rules = oaep_rules(mech)?;
        self.pka_encrypt(&rules, key, data, output)
    }

    /// OAEP decryption with the private key token
    pub fn rsa_oaep_decrypt(
        &self,
        mech: &CkMechanism,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
    ) -> Result<usize> {
        let rules = oaep_rules(mech)?;
        self.pka_decrypt(&rules, key, data, output)
    }

    /// PKCS#1 v1.5 signature over already formatted data
    pub fn rsa_sign(
        &self,
        key: &Template,
        data: &[u8],
        signature: &mut [u8],
    ) -> Result<usize> {
        let rules = RuleArray::from_keywords(&["PKCS-1.1"]);
        self.rsa_signature(&rules, key, data, signature)
    }

    /// Checks a PKCS#1 v1.5 signature over already formatted data
    pub fn rsa_verify(
        &self,
        key: &Template,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let rules = RuleArray::from_keywords(&["PKCS-1.1"]);
        self.rsa_signature_verify(&rules, key, data, signature)
    }

    /// PSS signature of a digest computed by the caller
    pub fn rsa_pss_sign(
        &self,
        mech: &CkMechanism,
        key: &Template,
        digest: &[u8],
        signature: &mut [u8],
    ) -> Result<usize> {
        let (rules, message) = pss_request(mech, digest)?;
        self.rsa_signature(&rules, key, &message, signature)
    }

    /// Checks a PSS signature of a digest computed by the caller
    pub fn rsa_pss_verify(
        &self,
        mech: &CkMechanism,
        key: &Template,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let (rules, message) = pss_request(mech, digest)?;
        self.rsa_signature_verify(&rules, key, &message, signature)
    }
}
