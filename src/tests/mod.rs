// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

use super::*;
use hex;
use std::sync::Arc;

use crate::attribute::Attribute;
use crate::mechanism::{CkMechanism, MechParams};
use crate::template::Template;

mod fake;
use fake::*;

macro_rules! ret_or_panic {
    ($ret:expr) => {
        match $ret {
            Ok(r) => r,
            Err(e) => panic!("{e}"),
        }
    };
}

/* DER encoded OID of prime256v1 */
const P256_PARAMS: &str = "06082a8648ce3d030107";

struct TestCca {
    hsm: Arc<FakeHsm>,
    cca: Cca,
}

impl TestCca {
    fn new() -> TestCca {
        TestCca::with_hsm(FakeHsm::new(), Config::default())
    }

    fn with_hsm(hsm: FakeHsm, config: Config) -> TestCca {
        let hsm = Arc::new(hsm);
        let cca = Cca::new(hsm.clone(), config);
        TestCca { hsm: hsm, cca: cca }
    }
}

fn key_template(
    class: CK_OBJECT_CLASS,
    key_type: CK_KEY_TYPE,
    attrs: Vec<Attribute>,
) -> Template {
    let mut tmpl = Template::from_attributes(vec![
        Attribute::from_ulong(CKA_CLASS, class),
        Attribute::from_ulong(CKA_KEY_TYPE, key_type),
    ]);
    for a in attrs {
        tmpl.build_and_update(a);
    }
    tmpl
}

fn secret_template(key_type: CK_KEY_TYPE, value: &[u8]) -> Template {
    key_template(
        CKO_SECRET_KEY,
        key_type,
        vec![Attribute::from_bytes(CKA_VALUE, value.to_vec())],
    )
}

fn token_template(
    class: CK_OBJECT_CLASS,
    key_type: CK_KEY_TYPE,
    token: &[u8],
) -> Template {
    key_template(
        class,
        key_type,
        vec![Attribute::from_bytes(CKA_IBM_OPAQUE, token.to_vec())],
    )
}

/// The test RSA key as clear CRT components
fn rsa_private_template() -> Template {
    key_template(
        CKO_PRIVATE_KEY,
        CKK_RSA,
        vec![
            Attribute::from_bytes(CKA_MODULUS, test_rsa(TEST_RSA_N)),
            Attribute::from_bytes(CKA_PUBLIC_EXPONENT, TEST_RSA_E.to_vec()),
            Attribute::from_bytes(CKA_PRIVATE_EXPONENT, test_rsa(TEST_RSA_D)),
            Attribute::from_bytes(CKA_PRIME_1, test_rsa(TEST_RSA_P)),
            Attribute::from_bytes(CKA_PRIME_2, test_rsa(TEST_RSA_Q)),
            Attribute::from_bytes(CKA_EXPONENT_1, test_rsa(TEST_RSA_DP)),
            Attribute::from_bytes(CKA_EXPONENT_2, test_rsa(TEST_RSA_DQ)),
            Attribute::from_bytes(CKA_COEFFICIENT, test_rsa(TEST_RSA_U)),
        ],
    )
}

fn rsa_public_template() -> Template {
    key_template(
        CKO_PUBLIC_KEY,
        CKK_RSA,
        vec![
            Attribute::from_bytes(CKA_MODULUS, test_rsa(TEST_RSA_N)),
            Attribute::from_bytes(CKA_PUBLIC_EXPONENT, TEST_RSA_E.to_vec()),
            Attribute::from_ulong(CKA_MODULUS_BITS, TEST_RSA_BITS as CK_ULONG),
        ],
    )
}

fn value_of(tmpl: &Template, t: CK_ATTRIBUTE_TYPE) -> Vec<u8> {
    match tmpl.find(t) {
        Some(a) => a.get_value().to_vec(),
        None => panic!("missing attribute {}", attr_name(t)),
    }
}

/// Splits `data` into pieces whose sizes cycle through `sizes`
fn chunked<'a>(data: &'a [u8], sizes: &[usize]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut rest = data;
    for size in sizes.iter().cycle() {
        if rest.is_empty() {
            break;
        }
        let (chunk, tail) = rest.split_at(std::cmp::min(*size, rest.len()));
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

/// Chunkings around the block size `block`
fn chunk_patterns(block: usize) -> Vec<Vec<usize>> {
    vec![
        vec![1],
        vec![block - 1],
        vec![block],
        vec![block + 1],
        vec![block - 1, block, block + 1],
        vec![3, 0, 70, 1, 2 * block + 5, 17],
    ]
}

fn rules(keywords: &[&str]) -> Vec<String> {
    keywords.iter().map(|k| k.to_string()).collect()
}
