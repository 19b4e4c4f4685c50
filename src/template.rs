// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Ordered attribute templates exchanged with the object layer

use crate::attribute::{AttrType, Attribute};
use crate::error::Result;
use crate::pkcs11::*;

use zeroize::Zeroizing;

/// An ordered set of attributes with unique ids
///
/// Building an attribute that already exists replaces the old value in
/// place, so insertion order is stable across updates.
#[derive(Clone, Debug, Default)]
pub struct Template {
    attributes: Vec<Attribute>,
}

impl Template {
    /// Empty template
    pub fn new() -> Template {
        Template {
            attributes: Vec::new(),
        }
    }

    /// Template from a list, later duplicates replace earlier ones
    pub fn from_attributes(attrs: Vec<Attribute>) -> Template {
        let mut tmpl = Template::new();
        for a in attrs {
            tmpl.build_and_update(a);
        }
        tmpl
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the template holds no attribute
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Attributes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Looks up an attribute by id
    pub fn find(&self, t: CK_ATTRIBUTE_TYPE) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.get_type() == t)
    }

    fn find_mut(&mut self, t: CK_ATTRIBUTE_TYPE) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.get_type() == t)
    }

    /// Returns the value of `t`, failing with CKR_TEMPLATE_INCOMPLETE if
    /// the attribute is absent or empty
    pub fn get_non_empty(&self, t: CK_ATTRIBUTE_TYPE) -> Result<&[u8]> {
        match self.find(t) {
            Some(a) if !a.is_empty() => Ok(a.get_value()),
            _ => Err(CKR_TEMPLATE_INCOMPLETE)?,
        }
    }

    /// Like [Template::get_non_empty] but returns an owned copy that is
    /// wiped on drop
    pub fn get_sensitive(
        &self,
        t: CK_ATTRIBUTE_TYPE,
    ) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(self.get_non_empty(t)?.to_vec()))
    }

    /// Reads a CK_ULONG attribute
    pub fn get_ulong(&self, t: CK_ATTRIBUTE_TYPE) -> Result<CK_ULONG> {
        match self.find(t) {
            Some(a) => a.to_ulong(),
            None => Err(CKR_TEMPLATE_INCOMPLETE)?,
        }
    }

    /// Reads a CK_BBOOL attribute
    pub fn get_bool(&self, t: CK_ATTRIBUTE_TYPE) -> Result<bool> {
        match self.find(t) {
            Some(a) => a.to_bool(),
            None => Err(CKR_TEMPLATE_INCOMPLETE)?,
        }
    }

    /// Replaces the attribute with the same id in place, or appends it
    pub fn build_and_update(&mut self, attr: Attribute) {
        match self.find_mut(attr.get_type()) {
            Some(a) => *a = attr,
            None => self.attributes.push(attr),
        }
    }

    /// Sets a byte valued attribute
    pub fn set_bytes(&mut self, t: CK_ATTRIBUTE_TYPE, value: &[u8]) {
        self.build_and_update(Attribute::from_bytes(t, value.to_vec()));
    }

    /// Sets a CK_BBOOL attribute
    pub fn set_bool(&mut self, t: CK_ATTRIBUTE_TYPE, value: bool) {
        self.build_and_update(Attribute::from_bool(t, value));
    }

    /// Sets a CK_ULONG attribute
    pub fn set_ulong(&mut self, t: CK_ATTRIBUTE_TYPE, value: CK_ULONG) {
        self.build_and_update(Attribute::from_ulong(t, value));
    }

    /// Removes and returns an attribute
    pub fn remove(&mut self, t: CK_ATTRIBUTE_TYPE) -> Option<Attribute> {
        let idx = self.attributes.iter().position(|a| a.get_type() == t)?;
        Some(self.attributes.remove(idx))
    }

    /// Zeroizes the value of `t` in place, leaving an empty attribute
    pub fn cleanse(&mut self, t: CK_ATTRIBUTE_TYPE) {
        if let Some(a) = self.find_mut(t) {
            a.cleanse();
        }
    }

    /// Zeroizes every attribute that carries clear key material
    pub fn cleanse_sensitive(&mut self) {
        for a in self.attributes.iter_mut() {
            if let Ok(AttrType::SensitiveType) =
                AttrType::attr_id_to_attrtype(a.get_type())
            {
                a.cleanse();
            }
        }
    }
}
