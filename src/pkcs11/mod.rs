// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! PKCS#11 types and constants
//!
//! The standard vocabulary comes from the `cryptoki-sys` bindings, the
//! IBM vendor extensions used by CCA tokens are defined in [vendor].

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]

pub use cryptoki_sys::*;

pub mod vendor;
pub use vendor::*;
