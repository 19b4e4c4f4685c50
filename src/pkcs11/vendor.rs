// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! PKCS#11 API Vendor extensions

use crate::pkcs11::*;

/// Base of the IBM vendor defined attributes
pub const IBM_VENDOR_OFFSET: CK_ULONG = CKA_VENDOR_DEFINED;

/* Attributes */

/// Holds the opaque CCA key token of a hardware resident key
pub const CKA_IBM_OPAQUE: CK_ATTRIBUTE_TYPE = IBM_VENDOR_OFFSET + 1;
