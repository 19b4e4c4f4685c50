// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Boundary with the CCA coprocessor
//!
//! Every CCA verb takes a rule array of 8 byte, space padded keywords
//! and reports a return code plus a reason code. The [HsmClient] trait
//! exposes one method per verb used by this token so that a real
//! binding to the vendor library, or a fake one in tests, can be
//! injected at construction time.

use std::fmt;
use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::pkcs11::*;
use crate::{trace_error, trace_warn};

use bitflags::bitflags;

/// Return code of a successful verb
pub const CCA_SUCCESS: i64 = 0;

/// Size of one rule array keyword
pub const KEYWORD_SIZE: usize = 8;

/// Size of the chaining vector used by multi-part hash and HMAC verbs
pub const CHAIN_VECTOR_SIZE: usize = 128;

/// Size of a fixed length DES/AES key identifier
pub const KEY_ID_SIZE: usize = 64;

/// Primary and secondary status of a CCA verb
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HsmStatus {
    /// Primary status, 0 on success
    pub return_code: i64,
    /// Secondary status, details the return code
    pub reason_code: i64,
}

impl HsmStatus {
    /// Status from its two codes
    pub fn new(return_code: i64, reason_code: i64) -> HsmStatus {
        HsmStatus {
            return_code: return_code,
            reason_code: reason_code,
        }
    }

    /// The clean success status
    pub fn success() -> HsmStatus {
        HsmStatus::default()
    }

    /// Whether the verb succeeded, possibly with a reason code
    pub fn is_success(&self) -> bool {
        self.return_code == CCA_SUCCESS
    }

    /// Matches an exact return and reason code pair
    pub fn is(&self, return_code: i64, reason_code: i64) -> bool {
        self.return_code == return_code && self.reason_code == reason_code
    }
}

impl fmt::Display for HsmStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "return:{}, reason:{}", self.return_code, self.reason_code)
    }
}

/// The outcome of a verb, `value` is only meaningful on success
#[derive(Debug)]
pub struct HsmReply<T> {
    /// Status reported by the verb
    pub status: HsmStatus,
    /// Output of the verb
    pub value: T,
}

impl<T> HsmReply<T> {
    /// Reply from its parts
    pub fn new(status: HsmStatus, value: T) -> HsmReply<T> {
        HsmReply {
            status: status,
            value: value,
        }
    }

    /// Successful reply
    pub fn ok(value: T) -> HsmReply<T> {
        HsmReply::new(HsmStatus::success(), value)
    }

    /// Separates failures from successes, tracing both failures and
    /// successful calls that carry a reason code
    pub fn check(self, verb: &str) -> std::result::Result<T, HsmStatus> {
        if !self.status.is_success() {
            trace_error!("{} failed. {}", verb, self.status);
            return Err(self.status);
        }
        if self.status.reason_code != 0 {
            trace_warn!(
                "{} succeeded, but returned reason:{}",
                verb,
                self.status.reason_code
            );
        }
        Ok(self.value)
    }

    /// Maps any failure to CKR_FUNCTION_FAILED
    pub fn or_failed(self, verb: &str) -> Result<T> {
        self.check(verb)
            .map_err(|s| Error::hsm(CKR_FUNCTION_FAILED, s))
    }
}

impl<T: Default> HsmReply<T> {
    /// Failed reply with a default value
    pub fn failed(return_code: i64, reason_code: i64) -> HsmReply<T> {
        HsmReply::new(HsmStatus::new(return_code, reason_code), T::default())
    }
}

/// Rule array as passed to CCA verbs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleArray {
    buf: Vec<u8>,
}

impl RuleArray {
    /// Empty rule array
    pub fn new() -> RuleArray {
        RuleArray { buf: Vec::new() }
    }

    /// Rule array holding `keywords` in order
    pub fn from_keywords(keywords: &[&str]) -> RuleArray {
        let mut rules = RuleArray::new();
        for kw in keywords {
            rules.push(kw);
        }
        rules
    }

    /// Appends a keyword, padded with spaces to 8 bytes
    pub fn push(&mut self, keyword: &str) -> &mut RuleArray {
        let mut kw = [b' '; KEYWORD_SIZE];
        kw.iter_mut()
            .zip(keyword.bytes())
            .for_each(|(d, s)| *d = s);
        self.buf.extend_from_slice(&kw);
        self
    }

    /// Number of keywords, the rule array count of the verbs
    pub fn count(&self) -> usize {
        self.buf.len() / KEYWORD_SIZE
    }

    /// The padded keywords as passed to the verbs
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Keywords with their padding removed
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.buf
            .chunks(KEYWORD_SIZE)
            .map(|k| std::str::from_utf8(k).unwrap_or("").trim_end())
    }

    /// Whether `keyword` is one of the rules
    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords().any(|k| k == keyword)
    }
}

bitflags! {
    /// Optional coprocessor features
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HsmCapabilities: u32 {
        /// HMAC generate and verify verbs are available
        const NATIVE_HMAC = 0x0001;
    }
}

/// Reason codes CCA uses to reject an unsupported curve
const CURVE_REASONS: [i64; 4] = [874, 2158, 6015, 6017];

/// Whether a key generation or import failure means the curve is not
/// supported by the coprocessor
pub fn is_curve_error(status: &HsmStatus) -> bool {
    status.return_code == 8 && CURVE_REASONS.contains(&status.reason_code)
}

/// The CCA verbs this token relies on
///
/// Output tokens are returned as owned buffers, operations that produce
/// data into a caller provided buffer return the number of bytes
/// written, or on failure the needed size in `value` when the HSM
/// reports one.
pub trait HsmClient: Debug + Send + Sync {
    /// Optional features of the coprocessor, all of them by default
    fn capabilities(&self) -> HsmCapabilities {
        HsmCapabilities::all()
    }

    /// CSNDPKB, builds a skeleton or external PKA key token
    fn pka_key_token_build(
        &self,
        rules: &RuleArray,
        key_values: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNDPKG, generates a key pair from a skeleton
    fn pka_key_generate(
        &self,
        rules: &RuleArray,
        skeleton: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNDPKX, extracts the public key token from a private one
    fn pka_public_key_extract(
        &self,
        rules: &RuleArray,
        private_token: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNDPKI, imports a clear private key token under the master key
    fn pka_key_import(
        &self,
        rules: &RuleArray,
        source_token: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNDPKE
    fn pka_encrypt(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNDPKD
    fn pka_decrypt(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNDDSG
    fn signature_generate(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        signature: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNDDSV
    fn signature_verify(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> HsmReply<()>;

    /// CSNBCKM, imports a clear DES or AES key
    fn clear_key_import(
        &self,
        rules: &RuleArray,
        clear_key: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNBKTB, builds a fixed length skeleton token
    fn key_token_build(
        &self,
        rules: &RuleArray,
        key_type: &str,
    ) -> HsmReply<Vec<u8>>;

    /// CSNBKGN, generates a fixed length DES or AES key
    fn key_generate(
        &self,
        key_form: &str,
        key_length: &str,
        key_type_1: &str,
        key_type_2: &str,
        skeleton: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNBKTB2, builds a variable length skeleton token
    fn key_token_build2(&self, rules: &RuleArray) -> HsmReply<Vec<u8>>;

    /// CSNBKPI2, adds a clear key part to a variable length token
    fn key_part_import2(
        &self,
        rules: &RuleArray,
        key_part: &[u8],
        key_part_bits: usize,
        token: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNBKGN2, generates a variable length key into a skeleton
    fn key_generate2(
        &self,
        rules: &RuleArray,
        key_bits: usize,
        key_type_1: &str,
        key_type_2: &str,
        skeleton: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNBOWH, one-shot or multi-part hash
    fn one_way_hash(
        &self,
        rules: &RuleArray,
        data: &[u8],
        chain_vector: &mut [u8],
        hash: &mut [u8],
    ) -> HsmReply<()>;

    /// CSNBHMG, one-shot or multi-part HMAC generation
    fn hmac_generate(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        chain_vector: &mut [u8],
        mac: &mut [u8],
    ) -> HsmReply<()>;

    /// CSNBHMV, one-shot or multi-part HMAC verification
    fn hmac_verify(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        chain_vector: &mut [u8],
        mac: &[u8],
    ) -> HsmReply<()>;

    /// CSNDSYX, exports a symmetric key under an RSA public key
    fn symmetric_key_export(
        &self,
        rules: &RuleArray,
        source_key: &[u8],
        transport_key: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNDSYI, imports a symmetric key wrapped under an RSA key
    fn symmetric_key_import(
        &self,
        rules: &RuleArray,
        enciphered_key: &[u8],
        transport_key: &[u8],
    ) -> HsmReply<Vec<u8>>;

    /// CSNBENC
    fn des_encipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNBDEC
    fn des_decipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNBSAE
    fn aes_encipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNBSAD
    fn aes_decipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize>;

    /// CSNBRNGL
    fn random_number_generate(
        &self,
        rules: &RuleArray,
        output: &mut [u8],
    ) -> HsmReply<()>;
}
