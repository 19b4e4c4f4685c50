// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! EC keys and ECDSA

use crate::curves::{
    curve_by_type_and_bits, encode_ec_point, importable_curve,
    CurveDescriptor,
};
use crate::error::{Error, Result};
use crate::hsm::{is_curve_error, HsmStatus, RuleArray};
use crate::keytoken::{KeyToken, TokenKind};
use crate::kvs::{ec_generate_kvs, ec_private_kvs, ec_public_kvs};
use crate::object::{expect_token, has_key_token, key_token};
use crate::pkcs11::*;
use crate::template::Template;
use crate::{trace_debug, trace_error, Cca};

use zeroize::Zeroizing;

/// Maps failures of verbs that may reject the curve itself
fn ec_error(status: HsmStatus) -> Error {
    if is_curve_error(&status) {
        Error::hsm(CKR_CURVE_NOT_SUPPORTED, status)
    } else {
        Error::hsm(CKR_FUNCTION_FAILED, status)
    }
}

fn ec_verify_error(status: HsmStatus) -> Error {
    if status.is(4, 429) || status.is(12, 769) {
        Error::hsm(CKR_SIGNATURE_INVALID, status)
    } else {
        ec_error(status)
    }
}

fn token_curve(token: &KeyToken) -> Result<&'static CurveDescriptor> {
    curve_by_type_and_bits(token.curve_type(), token.bits())
}

/// Publishes CKA_EC_PARAMS for the curve the token is on
fn publish_params(tmpl: &mut Template, token: &KeyToken) -> Result<()> {
    let curve = token_curve(token)?;
    tmpl.set_bytes(CKA_EC_PARAMS, &curve.ec_params()?);
    Ok(())
}

fn publish_point(tmpl: &mut Template, token: &KeyToken) -> Result<()> {
    let q = token.ec_point_vec()?;
    tmpl.set_bytes(CKA_EC_POINT, &encode_ec_point(&q)?);
    Ok(())
}

/// Finds the curve named by CKA_EC_PARAMS, only curves CCA can create
/// keys on are accepted
fn template_curve(tmpl: &Template) -> Result<&'static CurveDescriptor> {
    let params = match tmpl.get_non_empty(CKA_EC_PARAMS) {
        Ok(p) => p,
        Err(e) => {
            trace_error!("Could not find CKA_EC_PARAMS for the key");
            return Err(e);
        }
    };
    importable_curve(params)
}

/// Raw public point from CKA_EC_POINT, which must be a DER OCTET STRING
fn template_point(tmpl: &Template) -> Result<Vec<u8>> {
    let value = tmpl.get_non_empty(CKA_EC_POINT)?;
    match asn1::parse_single::<&[u8]>(value) {
        Ok(q) => Ok(q.to_vec()),
        Err(_) => {
            trace_error!("ber decoding of public key failed");
            Err(CKR_ATTRIBUTE_VALUE_INVALID)?
        }
    }
}

impl Cca {
    /// Generates an EC key pair on the curve named by CKA_EC_PARAMS of
    /// the public template
    pub fn ec_generate_keypair(
        &self,
        pub_tmpl: &mut Template,
        priv_tmpl: &mut Template,
    ) -> Result<()> {
        let curve = template_curve(pub_tmpl)?;
        let kvs = ec_generate_kvs(curve)?;

        let rules = RuleArray::from_keywords(&["ECC-PAIR"]);
        let skeleton = self
            .hsm()
            .pka_key_token_build(&rules, &kvs)
            .check("CSNDPKB (EC KEY TOKEN BUILD)")
            .map_err(ec_error)?;

        let rules = RuleArray::from_keywords(&["MASTER"]);
        let private = self
            .hsm()
            .pka_key_generate(&rules, &skeleton)
            .check("CSNDPKG (EC KEY GENERATE)")
            .map_err(ec_error)?;
        trace_debug!("EC secure key token generated. size: {}", private.len());

        let public = self
            .hsm()
            .pka_public_key_extract(&RuleArray::new(), &private)
            .or_failed("CSNDPKX (PUBLIC KEY TOKEN EXTRACT)")?;

        let token = KeyToken::classify(&private)?;
        if token.kind() != TokenKind::EcPrivate {
            return Err(CKR_FUNCTION_FAILED)?;
        }
        publish_point(pub_tmpl, &token)?;
        priv_tmpl.set_bytes(CKA_EC_PARAMS, &curve.ec_params()?);
        pub_tmpl.set_bytes(CKA_IBM_OPAQUE, &public);
        priv_tmpl.set_bytes(CKA_IBM_OPAQUE, &private);
        Ok(())
    }

    pub(crate) fn import_ec_private_key(
        &self,
        tmpl: &mut Template,
    ) -> Result<()> {
        let ret = if has_key_token(tmpl) {
            self.refresh_ec_private_key(tmpl)
        } else {
            self.import_clear_ec_private_key(tmpl)
        };
        tmpl.cleanse(CKA_VALUE);
        ret
    }

    fn refresh_ec_private_key(&self, tmpl: &mut Template) -> Result<()> {
        let data = expect_token(tmpl, TokenKind::EcPrivate)?;
        let token = KeyToken::classify(&data)?;
        publish_params(tmpl, &token)?;
        tmpl.set_bool(CKA_SENSITIVE, true);
        Ok(())
    }

    fn import_clear_ec_private_key(&self, tmpl: &mut Template) -> Result<()> {
        let curve = template_curve(tmpl)?;
        let d = tmpl.get_sensitive(CKA_VALUE)?;
        let q = template_point(tmpl)?;
        let kvs = ec_private_kvs(curve, &d, &q)?;

        let rules = RuleArray::from_keywords(&["ECC-PAIR"]);
        let clear = Zeroizing::new(
            self.hsm()
                .pka_key_token_build(&rules, &kvs)
                .check("CSNDPKB (EC KEY TOKEN BUILD)")
                .map_err(ec_error)?,
        );

        let rules = RuleArray::from_keywords(&["ECC"]);
        let wrapped = self
            .hsm()
            .pka_key_import(&rules, &clear)
            .check("CSNDPKI (EC KEY TOKEN IMPORT)")
            .map_err(ec_error)?;

        tmpl.set_bytes(CKA_IBM_OPAQUE, &wrapped);
        Ok(())
    }

    pub(crate) fn import_ec_public_key(
        &self,
        tmpl: &mut Template,
    ) -> Result<()> {
        if has_key_token(tmpl) {
            let data = expect_token(tmpl, TokenKind::EcPublic)?;
            let token = KeyToken::classify(&data)?;
            publish_params(tmpl, &token)?;
            return publish_point(tmpl, &token);
        }

        let curve = template_curve(tmpl)?;
        let q = template_point(tmpl)?;
        let kvs = ec_public_kvs(curve, &q)?;

        let rules = RuleArray::from_keywords(&["ECC-PUBL"]);
        let public = self
            .hsm()
            .pka_key_token_build(&rules, &kvs)
            .check("CSNDPKB (EC KEY TOKEN BUILD)")
            .map_err(ec_error)?;
        tmpl.set_bytes(CKA_IBM_OPAQUE, &public);
        Ok(())
    }

    /// ECDSA signature of a digest computed by the caller
    pub fn ec_sign(
        &self,
        key: &Template,
        digest: &[u8],
        signature: &mut [u8],
    ) -> Result<usize> {
        let token = key_token(key)?;
        let max = self.config.limits.max_ec_signature;
        let cap = std::cmp::min(signature.len(), max);
        let rules = RuleArray::from_keywords(&["ECDSA"]);
        self.hsm()
            .signature_generate(&rules, token, digest, &mut signature[..cap])
            .check("CSNDDSG (EC SIGN)")
            .map_err(ec_error)
    }

    /// ECDSA verification, a bad signature is CKR_SIGNATURE_INVALID
    pub fn ec_verify(
        &self,
        key: &Template,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let token = key_token(key)?;
        let rules = RuleArray::from_keywords(&["ECDSA"]);
        self.hsm()
            .signature_verify(&rules, token, digest, signature)
            .check("CSNDDSV (EC VERIFY)")
            .map_err(ec_verify_error)
    }
}
