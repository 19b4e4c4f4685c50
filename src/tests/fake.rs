// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! An in memory stand in for the coprocessor
//!
//! Tokens follow the real layouts closely enough to pass classification,
//! private material is kept in clear right after the public fields so
//! the verbs can operate on it. Hashes and HMACs are real, RSA is real
//! textbook RSA with PKCS#1 v1.5 style padding, ECDSA and the symmetric
//! ciphers are deterministic imitations.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::hsm::{
    HsmCapabilities, HsmClient, HsmReply, HsmStatus, RuleArray,
    CHAIN_VECTOR_SIZE, KEY_ID_SIZE,
};
use crate::keytoken::*;
use crate::misc::{get_be16, get_slice};

use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

pub const TEST_RSA_N: &str = "d971af79fbb7e5327d42839f3f0139509592f0f35b6ec4e0\
    2f3321385c803d2656ab4b41e96349f1f02aaa6b5c06f7202097b4075fdfa23f8818e8ab0b\
    3a0624bc53d33a6025e61c6b29d5d41c4893fd1243f98f370e7caa905363608fa0e7ed3304\
    17a4208a44db12c09257d4ae4b9b8101f12384da836e37568f67cc275fd7";
pub const TEST_RSA_D: &str = "b2db6b5e6829fc720a4c72ddc3426b759882d485283935e1\
    bd914e0b01334e994183069541b734f4b7fb3050bcd2d1e57049b880b460cc217bfe192bd0\
    413b18ea305cf2cef91b0e4dcf0cdbd0a60b0eb03b8f6da28cd76f8791f1d9322be068ae69\
    53182a5c022b29b23ab3530369ada87692311c28d43e5fc711bfd3621a01";
pub const TEST_RSA_P: &str = "f2b2107f419636c3612c094446c79971ab89c86194cbad0e\
    2fcf6b8eb9a8327e679b8e5de44387974d2ff3cff8b5304e628ee57333d0be8432ad20cfa2\
    ecc4d7";
pub const TEST_RSA_Q: &str = "e55d3f52a11860b1bb017512b9dedb5258ac9076e2d1fdb0\
    16f9ea3b7aedfcd6f2df30b942f9e9dda32aa877b1ffa5ba27493a72b77690a5850ac23450\
    7bdd01";
pub const TEST_RSA_DP: &str = "9c2abe78d4804f4edba955712cc6655382990f6ad32f5875\
    2788a5e25a4f03e6d8ce7d06a7ca5866a09179a6da97e4b49bb0edae7aaa18ddc22a2b51d0\
    b9e053";
pub const TEST_RSA_DQ: &str = "a21a2b1cccfa1bacc10c209fe1799dec2efb97064efc369d\
    733fa1c9f3f1ab168784323d5d169fb0a3170d05bb6980c975e68d46725f7b8f5fdde0af74\
    8a7601";
pub const TEST_RSA_U: &str = "0b67481c8656d7b01a34f326ca8955282d910e000aff51d8\
    d196720262f315feee5d701002c0b6e9861a787f154b6abeb53cd62f98119dc59e5a23ace9\
    2816d7";
pub const TEST_RSA_E: [u8; 3] = [0x01, 0x00, 0x01];
pub const TEST_RSA_BITS: usize = 1024;

pub fn test_rsa(component: &str) -> Vec<u8> {
    hex::decode(component).unwrap()
}

/* Reason codes of the failures this fake reports on its own */
const RS_BAD_RULE: i64 = 33;
const RS_BAD_LENGTH: i64 = 2034;
const RS_BAD_KEY: i64 = 2055;
const RS_SHORT_OUTPUT: i64 = 2064;
const RS_BAD_PADDING: i64 = 2072;

/* Tags of the intermediate blobs only this fake understands */
const TAG_RSA_SKELETON: u8 = 0xa0;
const TAG_RSA_CLEAR: u8 = 0xa1;
const TAG_EC_SKELETON: u8 = 0xb0;
const TAG_EC_CLEAR: u8 = 0xb1;

/* Clear private material stored after the public fields */
const RSA_ME_D_LEN_OFFSET: usize = 66;
const RSA_CRT_PARTS_LEN_OFFSET: usize = 66;
const EC_PRIV_D_LEN_OFFSET: usize = 14;
const EC_PRIV_D_OFFSET: usize = 16;
pub const SYM_KEY_OFFSET: usize = 16;
const HMAC_KEY_LEN_OFFSET: usize = 44;
const HMAC_KEY_OFFSET: usize = 64;

fn put16(buf: &mut [u8], offset: usize, val: usize) {
    let v = u16::try_from(val).unwrap();
    buf[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
}

fn fail(reason: i64) -> HsmStatus {
    HsmStatus::new(8, reason)
}

fn reply<T: Default>(r: Result<T, HsmStatus>) -> HsmReply<T> {
    match r {
        Ok(v) => HsmReply::ok(v),
        Err(s) => HsmReply::new(s, T::default()),
    }
}

fn keyword(rules: &RuleArray, idx: usize) -> String {
    rules.keywords().nth(idx).unwrap_or("").to_string()
}

fn section(id: u8, len: usize) -> Vec<u8> {
    let mut s = vec![0u8; len];
    s[0] = id;
    put16(&mut s, SECTION_LEN_OFFSET, len);
    s
}

fn pka_token(id: u8, sections: &[Vec<u8>]) -> Vec<u8> {
    let mut t = vec![0u8; TOKEN_HDR_LEN];
    t[0] = id;
    for s in sections {
        t.extend_from_slice(s);
    }
    let total = t.len();
    put16(&mut t, 2, total);
    t
}

fn rsa_public_section(bits: usize, n: &[u8], e: &[u8]) -> Vec<u8> {
    let mut s =
        section(SECTION_RSA_PUBLIC, RSA_PUB_E_OFFSET + e.len() + n.len());
    put16(&mut s, RSA_PUB_E_LEN_OFFSET, e.len());
    put16(&mut s, RSA_PUB_BITS_OFFSET, bits);
    put16(&mut s, RSA_PUB_N_LEN_OFFSET, n.len());
    let n_off = RSA_PUB_E_OFFSET + e.len();
    s[RSA_PUB_E_OFFSET..n_off].copy_from_slice(e);
    s[n_off..].copy_from_slice(n);
    s
}

pub fn rsa_public_token(bits: usize, n: &[u8], e: &[u8]) -> Vec<u8> {
    let public = rsa_public_section(bits, n, e);
    pka_token(TOKEN_ID_EXTERNAL_PKA, &[public])
}

/// Internal RSA token in modulus-exponent form
pub fn rsa_me_token(bits: usize, n: &[u8], e: &[u8], d: &[u8]) -> Vec<u8> {
    let mut s = section(SECTION_RSA_ME, RSA_ME_N_OFFSET + n.len() + d.len());
    put16(&mut s, RSA_ME_N_LEN_OFFSET, n.len());
    put16(&mut s, RSA_ME_D_LEN_OFFSET, d.len());
    let d_off = RSA_ME_N_OFFSET + n.len();
    s[RSA_ME_N_OFFSET..d_off].copy_from_slice(n);
    s[d_off..].copy_from_slice(d);
    pka_token(
        TOKEN_ID_INTERNAL_PKA,
        &[s, rsa_public_section(bits, &[], e)],
    )
}

/// Internal RSA token in CRT form, `parts` are p, q, dp, dq and u
pub fn rsa_crt_token(
    bits: usize,
    n: &[u8],
    e: &[u8],
    parts: &[Vec<u8>],
) -> Vec<u8> {
    let plen: usize = parts.iter().map(|p| p.len()).sum();
    let mut s = section(SECTION_RSA_CRT, RSA_CRT_N_OFFSET + n.len() + plen);
    put16(&mut s, RSA_CRT_N_LEN_OFFSET, n.len());
    let mut off = RSA_CRT_N_OFFSET;
    s[off..off + n.len()].copy_from_slice(n);
    off += n.len();
    for (i, p) in parts.iter().enumerate() {
        put16(&mut s, RSA_CRT_PARTS_LEN_OFFSET + 2 * i, p.len());
        s[off..off + p.len()].copy_from_slice(p);
        off += p.len();
    }
    pka_token(
        TOKEN_ID_INTERNAL_PKA,
        &[s, rsa_public_section(bits, &[], e)],
    )
}

pub fn test_rsa_private_token() -> Vec<u8> {
    rsa_me_token(
        TEST_RSA_BITS,
        &test_rsa(TEST_RSA_N),
        &TEST_RSA_E,
        &test_rsa(TEST_RSA_D),
    )
}

pub fn test_rsa_public_token() -> Vec<u8> {
    rsa_public_token(TEST_RSA_BITS, &test_rsa(TEST_RSA_N), &TEST_RSA_E)
}

fn ec_public_section(curve_type: u8, bits: usize, q: &[u8]) -> Vec<u8> {
    let mut s = section(SECTION_EC_PUBLIC, EC_PUB_Q_OFFSET + q.len());
    s[EC_PUB_CURVE_TYPE_OFFSET] = curve_type;
    put16(&mut s, EC_PUB_BITS_OFFSET, bits);
    put16(&mut s, EC_PUB_Q_LEN_OFFSET, q.len());
    s[EC_PUB_Q_OFFSET..].copy_from_slice(q);
    s
}

pub fn ec_public_token(curve_type: u8, bits: usize, q: &[u8]) -> Vec<u8> {
    let public = ec_public_section(curve_type, bits, q);
    pka_token(TOKEN_ID_EXTERNAL_PKA, &[public])
}

pub fn ec_private_token(
    curve_type: u8,
    bits: usize,
    d: &[u8],
    q: &[u8],
) -> Vec<u8> {
    let mut s = section(SECTION_EC_PRIVATE, EC_PRIV_D_OFFSET + d.len());
    s[EC_PRIV_WRAP_OFFSET] = EC_PRIV_WRAP_AESKW;
    s[EC_PRIV_CURVE_TYPE_OFFSET] = curve_type;
    s[EC_PRIV_FORMAT_OFFSET] = EC_PRIV_FORMAT_ENCRYPTED;
    put16(&mut s, EC_PRIV_BITS_OFFSET, bits);
    put16(&mut s, EC_PRIV_D_LEN_OFFSET, d.len());
    s[EC_PRIV_D_OFFSET..].copy_from_slice(d);
    pka_token(
        TOKEN_ID_INTERNAL_PKA,
        &[s, ec_public_section(curve_type, bits, q)],
    )
}

/// 8, 16 or 24 byte DES key identifier
pub fn des_token(key: &[u8]) -> Vec<u8> {
    let mut t = vec![0u8; SYM_TOKEN_LEN];
    t[0] = TOKEN_ID_INTERNAL_SYM;
    match key.len() {
        8 => t[SYM_VERSION_OFFSET] = SYM_VERSION_DES,
        16 => {
            t[SYM_VERSION_OFFSET] = SYM_VERSION_DES_DOUBLE;
            t[DES_KEY_LEN_OFFSET] = DES_KEY_LEN_DOUBLE;
        }
        _ => {
            t[SYM_VERSION_OFFSET] = SYM_VERSION_DES_DOUBLE;
            t[DES_KEY_LEN_OFFSET] = DES_KEY_LEN_TRIPLE;
        }
    }
    t[SYM_KEY_OFFSET..SYM_KEY_OFFSET + key.len()].copy_from_slice(key);
    t
}

/// 16, 24 or 32 byte AES key identifier
pub fn aes_token(key: &[u8]) -> Vec<u8> {
    let mut t = vec![0u8; SYM_TOKEN_LEN];
    t[0] = TOKEN_ID_INTERNAL_SYM;
    t[SYM_VERSION_OFFSET] = SYM_VERSION_AES;
    put16(&mut t, AES_BITS_OFFSET, key.len() * 8);
    t[SYM_KEY_OFFSET..SYM_KEY_OFFSET + key.len()].copy_from_slice(key);
    t
}

pub fn aes_cipher_token() -> Vec<u8> {
    let mut t = vec![0u8; 128];
    t[0] = TOKEN_ID_INTERNAL_SYM;
    t[SYM_VERSION_OFFSET] = SYM_VERSION_VARIABLE;
    t[VAR_ALGORITHM_OFFSET] = VAR_ALGORITHM_AES;
    put16(&mut t, VAR_KEY_TYPE_OFFSET, VAR_KEY_TYPE_CIPHER);
    t
}

pub fn hmac_payload_bits(key_bits: usize) -> usize {
    (((key_bits + 32) + 63) & !63) + 320
}

/// Variable length HMAC token, an empty key makes a skeleton
pub fn hmac_token(key: &[u8]) -> Vec<u8> {
    let mut t = vec![0u8; HMAC_KEY_OFFSET + key.len()];
    t[0] = TOKEN_ID_INTERNAL_SYM;
    t[SYM_VERSION_OFFSET] = SYM_VERSION_VARIABLE;
    t[HMAC_FORMAT_OFFSET] = 0x03;
    t[26] = 0x02;
    t[27] = 0x02;
    t[28] = 0x00;
    if !key.is_empty() {
        let bits = hmac_payload_bits(key.len() * 8);
        put16(&mut t, HMAC_PAYLOAD_BITS_OFFSET, bits);
    }
    t[VAR_ALGORITHM_OFFSET] = VAR_ALGORITHM_HMAC;
    put16(&mut t, VAR_KEY_TYPE_OFFSET, VAR_KEY_TYPE_MAC);
    put16(&mut t, HMAC_KEY_LEN_OFFSET, key.len());
    t[HMAC_KEY_OFFSET..].copy_from_slice(key);
    t
}

fn hmac_key(token: &[u8]) -> Option<Vec<u8>> {
    let tok = KeyToken::classify(token).ok()?;
    if tok.kind() != TokenKind::Hmac {
        return None;
    }
    let len = get_be16(token, HMAC_KEY_LEN_OFFSET)?;
    Some(get_slice(token, HMAC_KEY_OFFSET, len)?.to_vec())
}

fn sym_key(token: &[u8]) -> Option<(TokenKind, Vec<u8>)> {
    let tok = KeyToken::classify(token).ok()?;
    match tok.kind() {
        TokenKind::DesData | TokenKind::AesData => {
            let key = get_slice(token, SYM_KEY_OFFSET, tok.bits() / 8)?;
            Some((tok.kind(), key.to_vec()))
        }
        _ => None,
    }
}

fn block_size(keyword: &str) -> Option<usize> {
    match keyword {
        "SHA-1" | "SHA-224" | "SHA-256" => Some(64),
        "SHA-384" | "SHA-512" => Some(128),
        _ => None,
    }
}

fn hash(keyword: &str, data: &[u8]) -> Option<Vec<u8>> {
    match keyword {
        "SHA-1" => Some(Sha1::digest(data).to_vec()),
        "SHA-224" => Some(Sha224::digest(data).to_vec()),
        "SHA-256" => Some(Sha256::digest(data).to_vec()),
        "SHA-384" => Some(Sha384::digest(data).to_vec()),
        "SHA-512" => Some(Sha512::digest(data).to_vec()),
        _ => None,
    }
}

macro_rules! hmac_with {
    ($hash:ty, $key:expr, $data:expr) => {{
        let mut m = <Hmac<$hash> as Mac>::new_from_slice($key).ok()?;
        Mac::update(&mut m, $data);
        Some(Mac::finalize(m).into_bytes().to_vec())
    }};
}

fn hmac(keyword: &str, key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    match keyword {
        "SHA-1" => hmac_with!(Sha1, key, data),
        "SHA-224" => hmac_with!(Sha224, key, data),
        "SHA-256" => hmac_with!(Sha256, key, data),
        "SHA-384" => hmac_with!(Sha384, key, data),
        "SHA-512" => hmac_with!(Sha512, key, data),
        _ => None,
    }
}

enum RsaSecret {
    Exponent(Vec<u8>),
    Crt(Vec<Vec<u8>>),
}

struct RsaKey {
    n: Vec<u8>,
    e: Vec<u8>,
    secret: Option<RsaSecret>,
}

fn to_len(v: BigUint, len: usize) -> Vec<u8> {
    let b = v.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(b.len())];
    out.extend_from_slice(&b);
    out
}

impl RsaKey {
    fn from_token(token: &[u8]) -> Option<RsaKey> {
        let tok = KeyToken::classify(token).ok()?;
        let n = tok.rsa_modulus_vec().ok()?;
        let e = tok.rsa_public_exponent_vec().ok()?;
        let secret = match tok.kind() {
            TokenKind::RsaPublic => None,
            TokenKind::RsaPrivate => {
                let sec = &token[TOKEN_HDR_LEN..];
                if sec[0] == SECTION_RSA_ME {
                    let d_len = get_be16(sec, RSA_ME_D_LEN_OFFSET)?;
                    let d = get_slice(sec, RSA_ME_N_OFFSET + n.len(), d_len)?;
                    Some(RsaSecret::Exponent(d.to_vec()))
                } else {
                    let mut off = RSA_CRT_N_OFFSET + n.len();
                    let mut parts = Vec::new();
                    for i in 0..5 {
                        let lo = RSA_CRT_PARTS_LEN_OFFSET + 2 * i;
                        let l = get_be16(sec, lo)?;
                        parts.push(get_slice(sec, off, l)?.to_vec());
                        off += l;
                    }
                    Some(RsaSecret::Crt(parts))
                }
            }
            _ => return None,
        };
        Some(RsaKey {
            n: n,
            e: e,
            secret: secret,
        })
    }

    fn len(&self) -> usize {
        self.n.len()
    }

    /// None when the input is not smaller than the modulus
    fn public_op(&self, input: &[u8]) -> Option<Vec<u8>> {
        let n = BigUint::from_bytes_be(&self.n);
        let c = BigUint::from_bytes_be(input);
        if c >= n {
            return None;
        }
        let m = c.modpow(&BigUint::from_bytes_be(&self.e), &n);
        Some(to_len(m, self.len()))
    }

    fn private_op(&self, input: &[u8]) -> Option<Vec<u8>> {
        let n = BigUint::from_bytes_be(&self.n);
        let c = BigUint::from_bytes_be(input);
        if c >= n {
            return None;
        }
        let m = match self.secret.as_ref()? {
            RsaSecret::Exponent(d) => c.modpow(&BigUint::from_bytes_be(d), &n),
            RsaSecret::Crt(parts) => {
                let v: Vec<BigUint> =
                    parts.iter().map(|x| BigUint::from_bytes_be(x)).collect();
                let (p, q, dp, dq, u) = (&v[0], &v[1], &v[2], &v[3], &v[4]);
                let m1 = c.modpow(dp, p);
                let m2 = c.modpow(dq, q);
                let h = (u * (&m1 + p - (&m2 % p))) % p;
                m2 + h * q
            }
        };
        Some(to_len(m, self.len()))
    }
}

fn pkcs1_pad(block_type: u8, data: &[u8], k: usize) -> Option<Vec<u8>> {
    if data.len() + 11 > k {
        return None;
    }
    let fill = if block_type == 1 { 0xff } else { 0xa5 };
    let mut em = vec![0u8, block_type];
    em.resize(k - data.len() - 1, fill);
    em.push(0);
    em.extend_from_slice(data);
    Some(em)
}

fn pkcs1_unpad(em: &[u8]) -> Option<Vec<u8>> {
    if em.len() < 11 || em[0] != 0 || em[1] != 2 {
        return None;
    }
    let sep = em[2..].iter().position(|b| *b == 0)? + 2;
    if sep < 10 {
        return None;
    }
    Some(em[sep + 1..].to_vec())
}

fn ec_key(token: &[u8]) -> Option<(usize, Vec<u8>)> {
    let tok = KeyToken::classify(token).ok()?;
    match tok.kind() {
        TokenKind::EcPrivate | TokenKind::EcPublic => {
            Some(((tok.bits() + 7) / 8, tok.ec_point_vec().ok()?))
        }
        _ => None,
    }
}

/// Deterministic stand in for an ECDSA signature over `digest`
fn ecdsa(q: &[u8], digest: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 32);
    let mut counter = 0u8;
    while out.len() < len {
        let mut h = Sha256::new();
        h.update([counter]);
        h.update(q);
        h.update(digest);
        out.extend_from_slice(&h.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn xor_cipher(key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, b)| {
            let v = if iv.is_empty() { 0 } else { iv[i % iv.len()] };
            b ^ key[i % key.len()] ^ v
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct Call {
    pub verb: &'static str,
    pub rules: Vec<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    failures: HashMap<&'static str, HsmStatus>,
    streams: HashMap<u64, Vec<u8>>,
    counter: u64,
}

#[derive(Debug)]
pub struct FakeHsm {
    caps: HsmCapabilities,
    state: Mutex<State>,
}

impl FakeHsm {
    pub fn new() -> FakeHsm {
        FakeHsm {
            caps: HsmCapabilities::all(),
            state: Mutex::new(State::default()),
        }
    }

    /// A coprocessor without the HMAC verbs
    pub fn without_hmac() -> FakeHsm {
        FakeHsm {
            caps: HsmCapabilities::empty(),
            state: Mutex::new(State::default()),
        }
    }

    /// Makes every following call to `verb` fail with the given codes
    pub fn fail(&self, verb: &'static str, return_code: i64, reason: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .insert(verb, HsmStatus::new(return_code, reason));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn calls(&self, verb: &str) -> Vec<Call> {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|c| c.verb == verb)
            .cloned()
            .collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.calls(verb).len()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Rule keywords of the last call to `verb`
    pub fn last_rules(&self, verb: &str) -> Vec<String> {
        match self.calls(verb).pop() {
            Some(c) => c.rules,
            None => Vec::new(),
        }
    }

    fn enter<T: Default>(
        &self,
        verb: &'static str,
        rules: &RuleArray,
        data: &[u8],
    ) -> Option<HsmReply<T>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            verb: verb,
            rules: rules.keywords().map(|k| k.to_string()).collect(),
            data: data.to_vec(),
        });
        let status = *state.failures.get(verb)?;
        Some(HsmReply::new(status, T::default()))
    }

    fn fresh(&self, len: usize) -> Vec<u8> {
        let seed = {
            let mut state = self.state.lock().unwrap();
            state.counter += 1;
            state.counter as usize
        };
        (0..len)
            .map(|i| (seed * 151 + i * 29 + 7) as u8)
            .collect()
    }

    /// Accumulates multi-part input, the whole message is returned by
    /// the ONLY and LAST calls
    fn chain(
        &self,
        phase: &str,
        chain_vector: &mut [u8],
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, HsmStatus> {
        if chain_vector.len() < CHAIN_VECTOR_SIZE {
            return Err(fail(RS_BAD_LENGTH));
        }
        let mut state = self.state.lock().unwrap();
        match phase {
            "ONLY" => Ok(Some(data.to_vec())),
            "FIRST" => {
                state.counter += 1;
                let id = state.counter;
                chain_vector[..8].copy_from_slice(&id.to_be_bytes());
                state.streams.insert(id, data.to_vec());
                Ok(None)
            }
            "MIDDLE" | "LAST" => {
                let mut idb = [0u8; 8];
                idb.copy_from_slice(&chain_vector[..8]);
                let id = u64::from_be_bytes(idb);
                match state.streams.get_mut(&id) {
                    Some(buf) => buf.extend_from_slice(data),
                    None => return Err(fail(RS_BAD_LENGTH)),
                }
                if phase == "LAST" {
                    Ok(state.streams.remove(&id))
                } else {
                    Ok(None)
                }
            }
            _ => Err(fail(RS_BAD_RULE)),
        }
    }

    fn check_alignment(
        phase: &str,
        keyword: &str,
        data: &[u8],
    ) -> Result<(), HsmStatus> {
        let block = block_size(keyword).ok_or(fail(RS_BAD_RULE))?;
        match phase {
            "FIRST" | "MIDDLE" if data.len() % block != 0 => {
                Err(fail(RS_BAD_LENGTH))
            }
            _ => Ok(()),
        }
    }

    fn hmac_step(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        chain_vector: &mut [u8],
    ) -> Result<Option<Vec<u8>>, HsmStatus> {
        if keyword(rules, 0) != "HMAC" {
            return Err(fail(RS_BAD_RULE));
        }
        let kw = keyword(rules, 1);
        let phase = keyword(rules, 2);
        let key = hmac_key(key).ok_or(fail(RS_BAD_KEY))?;
        Self::check_alignment(&phase, &kw, data)?;
        match self.chain(&phase, chain_vector, data)? {
            Some(msg) => match hmac(&kw, &key, &msg) {
                Some(mac) => Ok(Some(mac)),
                None => Err(fail(RS_BAD_RULE)),
            },
            None => Ok(None),
        }
    }

    fn generate_pka(&self, skeleton: &[u8]) -> Result<Vec<u8>, HsmStatus> {
        let (tag, kvs) = match skeleton.split_first() {
            Some((t, k)) => (*t, k),
            None => return Err(fail(RS_BAD_KEY)),
        };
        match tag {
            TAG_RSA_SKELETON => {
                let bits = get_be16(kvs, 0).ok_or(fail(RS_BAD_KEY))?;
                let e_len = get_be16(kvs, 4).ok_or(fail(RS_BAD_KEY))?;
                let mut e = get_slice(kvs, 18, e_len)
                    .ok_or(fail(RS_BAD_KEY))?
                    .to_vec();
                if e.is_empty() {
                    e = TEST_RSA_E.to_vec();
                }
                if bits == TEST_RSA_BITS && e == TEST_RSA_E {
                    return Ok(test_rsa_private_token());
                }
                let mut n = self.fresh(bits / 8);
                n[0] |= 0x80;
                let d = self.fresh(bits / 8);
                Ok(rsa_me_token(bits, &n, &e, &d))
            }
            TAG_EC_SKELETON => {
                let curve_type = kvs[0];
                let bits = get_be16(kvs, 2).ok_or(fail(RS_BAD_KEY))?;
                let clen = (bits + 7) / 8;
                let d = self.fresh(clen);
                let mut q = vec![0x04];
                q.extend_from_slice(&self.fresh(2 * clen));
                Ok(ec_private_token(curve_type, bits, &d, &q))
            }
            _ => Err(fail(RS_BAD_KEY)),
        }
    }

    fn import_pka(
        rules: &RuleArray,
        source: &[u8],
    ) -> Result<Vec<u8>, HsmStatus> {
        let (tag, kvs) = match source.split_first() {
            Some((t, k)) => (*t, k),
            None => return Err(fail(RS_BAD_KEY)),
        };
        let field = |off: usize| get_be16(kvs, off).ok_or(fail(RS_BAD_KEY));
        match tag {
            TAG_RSA_CLEAR if rules.count() == 0 => {
                let bits = field(0)?;
                let mut lens = vec![field(2)?, field(4)?];
                for i in 0..5 {
                    lens.push(field(8 + 2 * i)?);
                }
                let mut off = 18;
                let mut values = Vec::new();
                for l in lens {
                    let v = get_slice(kvs, off, l).ok_or(fail(RS_BAD_KEY))?;
                    values.push(v.to_vec());
                    off += l;
                }
                Ok(rsa_crt_token(bits, &values[0], &values[1], &values[2..]))
            }
            TAG_EC_CLEAR if rules.contains("ECC") => {
                let bits = field(2)?;
                let d_len = field(4)?;
                let q_len = field(6)?;
                let d = get_slice(kvs, 8, d_len).ok_or(fail(RS_BAD_KEY))?;
                let q =
                    get_slice(kvs, 8 + d_len, q_len).ok_or(fail(RS_BAD_KEY))?;
                Ok(ec_private_token(kvs[0], bits, d, q))
            }
            _ => Err(fail(RS_BAD_RULE)),
        }
    }

    fn build_pka(
        rules: &RuleArray,
        kvs: &[u8],
    ) -> Result<Vec<u8>, HsmStatus> {
        let field = |off: usize| get_be16(kvs, off).ok_or(fail(RS_BAD_KEY));
        let tagged = |tag: u8| {
            let mut t = vec![tag];
            t.extend_from_slice(kvs);
            t
        };
        match keyword(rules, 0).as_str() {
            "RSA-AESC" if rules.contains("KEY-MGMT") => {
                if field(2)? == 0 {
                    Ok(tagged(TAG_RSA_SKELETON))
                } else {
                    Ok(tagged(TAG_RSA_CLEAR))
                }
            }
            "RSA-PUBL" => {
                let bits = field(0)?;
                let n_len = field(2)?;
                let e_len = field(4)?;
                let n = get_slice(kvs, 8, n_len).ok_or(fail(RS_BAD_KEY))?;
                let e =
                    get_slice(kvs, 8 + n_len, e_len).ok_or(fail(RS_BAD_KEY))?;
                Ok(rsa_public_token(bits, n, e))
            }
            "ECC-PAIR" | "ECC-PUBL" if kvs.first() > Some(&1) => {
                Err(HsmStatus::new(8, 874))
            }
            "ECC-PAIR" => {
                if field(4)? == 0 {
                    Ok(tagged(TAG_EC_SKELETON))
                } else {
                    Ok(tagged(TAG_EC_CLEAR))
                }
            }
            "ECC-PUBL" => {
                let q_len = field(4)?;
                let q = get_slice(kvs, 6, q_len).ok_or(fail(RS_BAD_KEY))?;
                Ok(ec_public_token(kvs[0], field(2)?, q))
            }
            _ => Err(fail(RS_BAD_RULE)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sym_cipher(
        &self,
        verb: &'static str,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> HsmReply<usize> {
        if let Some(r) = self.enter(verb, rules, data) {
            return r;
        }
        let (block, kind) = if verb.starts_with("CSNBS") {
            (16, TokenKind::AesData)
        } else {
            (8, TokenKind::DesData)
        };
        let key = match sym_key(key) {
            Some((k, key)) if k == kind => key,
            _ => return HsmReply::failed(8, RS_BAD_KEY),
        };
        let pad = rules.contains("PKCS-PAD");

        let mut input = data.to_vec();
        if encrypt && pad {
            let n = block - data.len() % block;
            input.resize(data.len() + n, n as u8);
        }
        if input.len() % block != 0 {
            return HsmReply::failed(8, RS_BAD_LENGTH);
        }
        let mut out = xor_cipher(&key, iv, &input);
        if !encrypt && pad {
            let n = match out.last() {
                Some(n) if *n as usize >= 1 && *n as usize <= block => {
                    *n as usize
                }
                _ => return HsmReply::failed(8, RS_BAD_PADDING),
            };
            out.truncate(out.len() - n);
        }
        if output.len() < out.len() {
            return HsmReply::new(fail(RS_SHORT_OUTPUT), out.len());
        }
        output[..out.len()].copy_from_slice(&out);
        HsmReply::ok(out.len())
    }
}

impl HsmClient for FakeHsm {
    fn capabilities(&self) -> HsmCapabilities {
        self.caps
    }

    fn pka_key_token_build(
        &self,
        rules: &RuleArray,
        key_values: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNDPKB", rules, key_values) {
            return r;
        }
        reply(Self::build_pka(rules, key_values))
    }

    fn pka_key_generate(
        &self,
        rules: &RuleArray,
        skeleton: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNDPKG", rules, skeleton) {
            return r;
        }
        if !rules.contains("MASTER") {
            return HsmReply::failed(8, RS_BAD_RULE);
        }
        reply(self.generate_pka(skeleton))
    }

    fn pka_public_key_extract(
        &self,
        rules: &RuleArray,
        private_token: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNDPKX", rules, private_token) {
            return r;
        }
        let tok = match KeyToken::classify(private_token) {
            Ok(t) => t,
            Err(_) => return HsmReply::failed(8, RS_BAD_KEY),
        };
        let public = match tok.kind() {
            TokenKind::RsaPrivate => {
                match (tok.rsa_modulus_vec(), tok.rsa_public_exponent_vec()) {
                    (Ok(n), Ok(e)) => rsa_public_token(tok.bits(), &n, &e),
                    _ => return HsmReply::failed(8, RS_BAD_KEY),
                }
            }
            TokenKind::EcPrivate => match tok.ec_point_vec() {
                Ok(q) => ec_public_token(tok.curve_type(), tok.bits(), &q),
                Err(_) => return HsmReply::failed(8, RS_BAD_KEY),
            },
            _ => return HsmReply::failed(8, RS_BAD_KEY),
        };
        HsmReply::ok(public)
    }

    fn pka_key_import(
        &self,
        rules: &RuleArray,
        source_token: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNDPKI", rules, source_token) {
            return r;
        }
        reply(Self::import_pka(rules, source_token))
    }

    fn pka_encrypt(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize> {
        if let Some(r) = self.enter("CSNDPKE", rules, data) {
            return r;
        }
        let key = match RsaKey::from_token(key) {
            Some(k) => k,
            None => return HsmReply::failed(8, RS_BAD_KEY),
        };
        if output.len() < key.len() {
            return HsmReply::new(fail(RS_SHORT_OUTPUT), key.len());
        }
        let c = match pkcs1_pad(2, data, key.len()) {
            Some(em) => key.public_op(&em),
            None => None,
        };
        match c {
            Some(c) => {
                output[..c.len()].copy_from_slice(&c);
                HsmReply::ok(c.len())
            }
            None => HsmReply::failed(8, RS_BAD_LENGTH),
        }
    }

    fn pka_decrypt(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize> {
        if let Some(r) = self.enter("CSNDPKD", rules, data) {
            return r;
        }
        let key = match RsaKey::from_token(key) {
            Some(k) => k,
            None => return HsmReply::failed(8, RS_BAD_KEY),
        };
        if data.len() != key.len() {
            return HsmReply::failed(8, RS_BAD_LENGTH);
        }
        let m = match key.private_op(data) {
            Some(em) => pkcs1_unpad(&em),
            None => None,
        };
        match m {
            Some(m) if m.len() <= output.len() => {
                output[..m.len()].copy_from_slice(&m);
                HsmReply::ok(m.len())
            }
            Some(m) => HsmReply::new(fail(RS_SHORT_OUTPUT), m.len()),
            None => HsmReply::failed(8, RS_BAD_PADDING),
        }
    }

    fn signature_generate(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        signature: &mut [u8],
    ) -> HsmReply<usize> {
        if let Some(r) = self.enter("CSNDDSG", rules, data) {
            return r;
        }
        if rules.contains("ECDSA") {
            let (clen, q) = match ec_key(key) {
                Some(k) => k,
                None => return HsmReply::failed(8, RS_BAD_KEY),
            };
            let len = 2 * clen;
            if signature.len() < len {
                return HsmReply::new(fail(RS_SHORT_OUTPUT), len);
            }
            signature[..len].copy_from_slice(&ecdsa(&q, data, len));
            return HsmReply::ok(len);
        }
        let key = match RsaKey::from_token(key) {
            Some(k) if k.secret.is_some() => k,
            _ => return HsmReply::failed(8, RS_BAD_KEY),
        };
        if signature.len() < key.len() {
            return HsmReply::new(fail(RS_SHORT_OUTPUT), key.len());
        }
        let s = match pkcs1_pad(1, data, key.len()) {
            Some(em) => key.private_op(&em),
            None => None,
        };
        match s {
            Some(s) => {
                signature[..s.len()].copy_from_slice(&s);
                HsmReply::ok(s.len())
            }
            None => HsmReply::failed(8, RS_BAD_LENGTH),
        }
    }

    fn signature_verify(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        signature: &[u8],
    ) -> HsmReply<()> {
        if let Some(r) = self.enter("CSNDDSV", rules, data) {
            return r;
        }
        if rules.contains("ECDSA") {
            return match ec_key(key) {
                Some((clen, q)) => {
                    if signature == ecdsa(&q, data, 2 * clen).as_slice() {
                        HsmReply::ok(())
                    } else {
                        HsmReply::failed(4, 429)
                    }
                }
                None => HsmReply::failed(8, RS_BAD_KEY),
            };
        }
        let key = match RsaKey::from_token(key) {
            Some(k) => k,
            None => return HsmReply::failed(8, RS_BAD_KEY),
        };
        let em = match key.public_op(signature) {
            Some(em) => em,
            None => return HsmReply::failed(8, 72),
        };
        match pkcs1_pad(1, data, key.len()) {
            Some(expected) if expected == em => HsmReply::ok(()),
            _ => HsmReply::failed(4, 429),
        }
    }

    fn clear_key_import(
        &self,
        rules: &RuleArray,
        clear_key: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNBCKM", rules, clear_key) {
            return r;
        }
        match (keyword(rules, 0).as_str(), clear_key.len()) {
            ("DES", 8 | 16 | 24) => HsmReply::ok(des_token(clear_key)),
            ("AES", 16 | 24 | 32) => HsmReply::ok(aes_token(clear_key)),
            _ => HsmReply::failed(8, RS_BAD_LENGTH),
        }
    }

    fn key_token_build(
        &self,
        rules: &RuleArray,
        key_type: &str,
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNBKTB", rules, key_type.as_bytes()) {
            return r;
        }
        if !rules.contains("AES") || key_type != "DATA" {
            return HsmReply::failed(8, RS_BAD_RULE);
        }
        let len = match keyword(rules, 3).as_str() {
            "KEYLN16" => 16,
            "KEYLN24" => 24,
            "KEYLN32" => 32,
            _ => return HsmReply::failed(8, RS_BAD_RULE),
        };
        HsmReply::ok(aes_token(&vec![0u8; len]))
    }

    fn key_generate(
        &self,
        key_form: &str,
        key_length: &str,
        key_type_1: &str,
        key_type_2: &str,
        skeleton: &[u8],
    ) -> HsmReply<Vec<u8>> {
        let rules = RuleArray::from_keywords(&[
            key_form, key_length, key_type_1, key_type_2,
        ]);
        if let Some(r) = self.enter("CSNBKGN", &rules, skeleton) {
            return r;
        }
        if key_form != "OP" || skeleton.len() != KEY_ID_SIZE {
            return HsmReply::failed(8, RS_BAD_RULE);
        }
        match (key_type_1, key_length) {
            ("AESTOKEN", _) => match KeyToken::classify(skeleton) {
                Ok(t) if t.kind() == TokenKind::AesData => {
                    HsmReply::ok(aes_token(&self.fresh(t.bits() / 8)))
                }
                _ => HsmReply::failed(8, RS_BAD_KEY),
            },
            ("DATA", "KEYLN8") => HsmReply::ok(des_token(&self.fresh(8))),
            ("DATA", "KEYLN24") => HsmReply::ok(des_token(&self.fresh(24))),
            _ => HsmReply::failed(8, RS_BAD_RULE),
        }
    }

    fn key_token_build2(&self, rules: &RuleArray) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNBKTB2", rules, &[]) {
            return r;
        }
        if !rules.contains("HMAC") || !rules.contains("MAC") {
            return HsmReply::failed(8, RS_BAD_RULE);
        }
        HsmReply::ok(hmac_token(&[]))
    }

    fn key_part_import2(
        &self,
        rules: &RuleArray,
        key_part: &[u8],
        key_part_bits: usize,
        token: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNBKPI2", rules, key_part) {
            return r;
        }
        if rules.contains("FIRST") {
            if key_part_bits != key_part.len() * 8 || key_part.is_empty() {
                return HsmReply::failed(8, RS_BAD_LENGTH);
            }
            /* a partial token has no payload size yet */
            let mut partial = hmac_token(key_part);
            put16(&mut partial, HMAC_PAYLOAD_BITS_OFFSET, 0);
            return HsmReply::ok(partial);
        }
        if rules.contains("COMPLETE") {
            let len = get_be16(token, HMAC_KEY_LEN_OFFSET).unwrap_or(0);
            return match get_slice(token, HMAC_KEY_OFFSET, len) {
                Some(key) if !key.is_empty() => HsmReply::ok(hmac_token(key)),
                _ => HsmReply::failed(8, RS_BAD_KEY),
            };
        }
        HsmReply::failed(8, RS_BAD_RULE)
    }

    fn key_generate2(
        &self,
        rules: &RuleArray,
        key_bits: usize,
        key_type_1: &str,
        key_type_2: &str,
        skeleton: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNBKGN2", rules, skeleton) {
            return r;
        }
        if key_type_1 != "TOKEN" || !key_type_2.is_empty() {
            return HsmReply::failed(8, RS_BAD_RULE);
        }
        HsmReply::ok(hmac_token(&self.fresh(key_bits / 8)))
    }

    fn one_way_hash(
        &self,
        rules: &RuleArray,
        data: &[u8],
        chain_vector: &mut [u8],
        hash_out: &mut [u8],
    ) -> HsmReply<()> {
        if let Some(r) = self.enter("CSNBOWH", rules, data) {
            return r;
        }
        let kw = keyword(rules, 0);
        let phase = keyword(rules, 1);
        let ret = Self::check_alignment(&phase, &kw, data)
            .and_then(|_| self.chain(&phase, chain_vector, data));
        match ret {
            Ok(Some(msg)) => match hash(&kw, &msg) {
                Some(h) if hash_out.len() >= h.len() => {
                    hash_out[..h.len()].copy_from_slice(&h);
                    HsmReply::ok(())
                }
                _ => HsmReply::failed(8, RS_SHORT_OUTPUT),
            },
            Ok(None) => HsmReply::ok(()),
            Err(s) => HsmReply::new(s, ()),
        }
    }

    fn hmac_generate(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        chain_vector: &mut [u8],
        mac: &mut [u8],
    ) -> HsmReply<()> {
        if let Some(r) = self.enter("CSNBHMG", rules, data) {
            return r;
        }
        match self.hmac_step(rules, key, data, chain_vector) {
            Ok(Some(full)) => {
                let n = std::cmp::min(mac.len(), full.len());
                mac[..n].copy_from_slice(&full[..n]);
                HsmReply::ok(())
            }
            Ok(None) => HsmReply::ok(()),
            Err(s) => HsmReply::new(s, ()),
        }
    }

    fn hmac_verify(
        &self,
        rules: &RuleArray,
        key: &[u8],
        data: &[u8],
        chain_vector: &mut [u8],
        mac: &[u8],
    ) -> HsmReply<()> {
        if let Some(r) = self.enter("CSNBHMV", rules, data) {
            return r;
        }
        match self.hmac_step(rules, key, data, chain_vector) {
            Ok(Some(full)) => {
                if mac.len() <= full.len() && full[..mac.len()] == *mac {
                    HsmReply::ok(())
                } else {
                    HsmReply::failed(4, 429)
                }
            }
            Ok(None) => HsmReply::ok(()),
            Err(s) => HsmReply::new(s, ()),
        }
    }

    fn symmetric_key_export(
        &self,
        rules: &RuleArray,
        source_key: &[u8],
        transport_key: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNDSYX", rules, source_key) {
            return r;
        }
        let expected = match keyword(rules, 0).as_str() {
            "DES" => TokenKind::DesData,
            "AES" => TokenKind::AesData,
            _ => return HsmReply::failed(8, RS_BAD_RULE),
        };
        let clear = match sym_key(source_key) {
            Some((kind, key)) if kind == expected => key,
            _ => return HsmReply::failed(8, RS_BAD_KEY),
        };
        let transport = match RsaKey::from_token(transport_key) {
            Some(k) => k,
            None => return HsmReply::failed(8, RS_BAD_KEY),
        };
        match pkcs1_pad(2, &clear, transport.len()) {
            Some(em) => match transport.public_op(&em) {
                Some(c) => HsmReply::ok(c),
                None => HsmReply::failed(8, RS_BAD_LENGTH),
            },
            None => HsmReply::failed(8, RS_BAD_LENGTH),
        }
    }

    fn symmetric_key_import(
        &self,
        rules: &RuleArray,
        enciphered_key: &[u8],
        transport_key: &[u8],
    ) -> HsmReply<Vec<u8>> {
        if let Some(r) = self.enter("CSNDSYI", rules, enciphered_key) {
            return r;
        }
        let transport = match RsaKey::from_token(transport_key) {
            Some(k) if k.secret.is_some() => k,
            _ => return HsmReply::failed(8, RS_BAD_KEY),
        };
        let clear = match transport.private_op(enciphered_key) {
            Some(em) => pkcs1_unpad(&em),
            None => None,
        };
        match (keyword(rules, 0).as_str(), clear) {
            ("DES", Some(k)) if [8, 16, 24].contains(&k.len()) => {
                HsmReply::ok(des_token(&k))
            }
            ("AES", Some(k)) if [16, 24, 32].contains(&k.len()) => {
                HsmReply::ok(aes_token(&k))
            }
            _ => HsmReply::failed(8, RS_BAD_PADDING),
        }
    }

    fn des_encipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize> {
        self.sym_cipher("CSNBENC", rules, key, iv, data, output, true)
    }

    fn des_decipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize> {
        self.sym_cipher("CSNBDEC", rules, key, iv, data, output, false)
    }

    fn aes_encipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize> {
        self.sym_cipher("CSNBSAE", rules, key, iv, data, output, true)
    }

    fn aes_decipher(
        &self,
        rules: &RuleArray,
        key: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
    ) -> HsmReply<usize> {
        self.sym_cipher("CSNBSAD", rules, key, iv, data, output, false)
    }

    fn random_number_generate(
        &self,
        rules: &RuleArray,
        output: &mut [u8],
    ) -> HsmReply<()> {
        let random = self.fresh(output.len());
        if let Some(r) = self.enter("CSNBRNGL", rules, &random) {
            return r;
        }
        if keyword(rules, 0) != "RANDOM" || output.len() > 8192 {
            return HsmReply::failed(8, RS_BAD_LENGTH);
        }
        output.copy_from_slice(&random);
        HsmReply::ok(())
    }
}
