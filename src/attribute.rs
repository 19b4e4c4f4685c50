// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the [Attribute] value type used by key templates
//! and maps the PKCS#11 attribute ids this token understands to a
//! printable name and the kind of data they carry ([AttrType]).

use std::cmp::Ordering;
use std::fmt;

use crate::error::Result;
use crate::misc::{bytes_to_ulong, ulong_to_bytes};
use crate::pkcs11::*;

use zeroize::Zeroize;

/// List of attribute types we understand
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttrType {
    /// A CK_BBOOL
    BoolType,
    /// A CK_ULONG
    NumType,
    /// UTF-8 text
    StringType,
    /// Opaque bytes
    BytesType,
    /// Holds clear key material and must be zeroized when discarded
    SensitiveType,
}

impl AttrType {
    /// Finds the attribute type from the attribute id
    pub fn attr_id_to_attrtype(id: CK_ULONG) -> Result<AttrType> {
        match Attrmap::search_by_id(id) {
            Some(a) => Ok(a.atype),
            None => Err(CKR_ATTRIBUTE_TYPE_INVALID)?,
        }
    }
}

/// Struct to map a PKCS#11 attribute to a type and a printable name
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    name: &'a str,
    atype: AttrType,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match &ATTRMAP.binary_search(&Attrmap {
            id: id,
            name: "",
            atype: AttrType::StringType,
        }) {
            Ok(i) => Some(&ATTRMAP[*i]),
            Err(_) => None,
        }
    }
}

/// Helper macro to populate the static attributes map
macro_rules! attrmap_element {
    ($id:expr; as $attrtype:ident) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            atype: AttrType::$attrtype,
        }
    };
}

/// Attributes read or written by the token layer, sorted by id
static ATTRMAP: [Attrmap<'_>; 32] = [
    attrmap_element!(CKA_CLASS; as NumType),
    attrmap_element!(CKA_TOKEN; as BoolType),
    attrmap_element!(CKA_PRIVATE; as BoolType),
    attrmap_element!(CKA_LABEL; as StringType),
    attrmap_element!(CKA_VALUE; as SensitiveType),
    attrmap_element!(CKA_KEY_TYPE; as NumType),
    attrmap_element!(CKA_ID; as BytesType),
    attrmap_element!(CKA_SENSITIVE; as BoolType),
    attrmap_element!(CKA_ENCRYPT; as BoolType),
    attrmap_element!(CKA_DECRYPT; as BoolType),
    attrmap_element!(CKA_WRAP; as BoolType),
    attrmap_element!(CKA_UNWRAP; as BoolType),
    attrmap_element!(CKA_SIGN; as BoolType),
    attrmap_element!(CKA_VERIFY; as BoolType),
    attrmap_element!(CKA_MODULUS; as BytesType),
    attrmap_element!(CKA_MODULUS_BITS; as NumType),
    attrmap_element!(CKA_PUBLIC_EXPONENT; as BytesType),
    attrmap_element!(CKA_PRIVATE_EXPONENT; as SensitiveType),
    attrmap_element!(CKA_PRIME_1; as SensitiveType),
    attrmap_element!(CKA_PRIME_2; as SensitiveType),
    attrmap_element!(CKA_EXPONENT_1; as SensitiveType),
    attrmap_element!(CKA_EXPONENT_2; as SensitiveType),
    attrmap_element!(CKA_COEFFICIENT; as SensitiveType),
    attrmap_element!(CKA_VALUE_LEN; as NumType),
    attrmap_element!(CKA_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_LOCAL; as BoolType),
    attrmap_element!(CKA_NEVER_EXTRACTABLE; as BoolType),
    attrmap_element!(CKA_ALWAYS_SENSITIVE; as BoolType),
    attrmap_element!(CKA_KEY_GEN_MECHANISM; as NumType),
    attrmap_element!(CKA_EC_PARAMS; as BytesType),
    attrmap_element!(CKA_EC_POINT; as BytesType),
    attrmap_element!(CKA_IBM_OPAQUE; as BytesType),
];

/// Returns the name of an attribute id, or its number if unknown
pub fn attr_name(id: CK_ATTRIBUTE_TYPE) -> String {
    match Attrmap::search_by_id(id) {
        Some(a) => a.name.to_string(),
        None => format!("{:#x}", id),
    }
}

/// An attribute id paired with its raw value
///
/// The value is wiped when the attribute is dropped, so clear key
/// material never outlives the template that held it.
#[derive(Clone, PartialEq, Eq)]
pub struct Attribute {
    ck_type: CK_ATTRIBUTE_TYPE,
    value: Vec<u8>,
}

impl Drop for Attribute {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("type", &attr_name(self.ck_type))
            .field("len", &self.value.len())
            .finish()
    }
}

impl Attribute {
    /// Creates an attribute holding raw bytes
    pub fn from_bytes(t: CK_ATTRIBUTE_TYPE, value: Vec<u8>) -> Attribute {
        Attribute {
            ck_type: t,
            value: value,
        }
    }

    /// Creates an attribute holding a native endian CK_ULONG
    pub fn from_ulong(t: CK_ATTRIBUTE_TYPE, value: CK_ULONG) -> Attribute {
        Attribute {
            ck_type: t,
            value: ulong_to_bytes(value),
        }
    }

    /// Creates a CK_BBOOL attribute
    pub fn from_bool(t: CK_ATTRIBUTE_TYPE, value: bool) -> Attribute {
        Attribute {
            ck_type: t,
            value: vec![u8::from(value)],
        }
    }

    /// Returns the PKCS#11 attribute 'type' which is the attribute ID
    pub fn get_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.ck_type
    }

    /// The raw value
    pub fn get_value(&self) -> &[u8] {
        &self.value
    }

    /// Whether the value has no bytes
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Reads the value as a CK_ULONG
    pub fn to_ulong(&self) -> Result<CK_ULONG> {
        bytes_to_ulong(&self.value)
    }

    /// Reads the value as a CK_BBOOL
    pub fn to_bool(&self) -> Result<bool> {
        match self.value.as_slice() {
            [0] => Ok(false),
            [_] => Ok(true),
            _ => Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
        }
    }

    /// Overwrites the value with zeros and empties it
    pub fn cleanse(&mut self) {
        self.value.zeroize();
    }
}
