//! Ordered subject attribute lists.
//!
//! A certificate subject is kept as an ordered sequence of `{name, value}`
//! pairs so that the root's subject can be reproduced as a leaf's issuer
//! without reordering.

use std::fmt;

use rcgen::string::PrintableString;
use rcgen::{DistinguishedName, DnType, DnValue};
use serde::{Deserialize, Serialize};
use x509_parser::oid_registry::{
    OID_X509_COMMON_NAME, OID_X509_COUNTRY_NAME, OID_X509_LOCALITY_NAME,
    OID_X509_ORGANIZATION_NAME, OID_X509_ORGANIZATIONAL_UNIT, OID_X509_STATE_OR_PROVINCE_NAME,
    Oid,
};
use x509_parser::asn1_rs::{Any, Tag};
use x509_parser::x509::X509Name;

/// Subject attribute types understood by the CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeName {
    /// `CN`
    CommonName,
    /// `C`
    Country,
    /// `ST`
    State,
    /// `L`
    Locality,
    /// `O`
    Organization,
    /// `OU`
    OrganizationalUnit,
}

impl AttributeName {
    /// Short label used in `CN=...` style renderings.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::CommonName => "CN",
            Self::Country => "C",
            Self::State => "ST",
            Self::Locality => "L",
            Self::Organization => "O",
            Self::OrganizationalUnit => "OU",
        }
    }

    fn dn_type(self) -> DnType {
        match self {
            Self::CommonName => DnType::CommonName,
            Self::Country => DnType::CountryName,
            Self::State => DnType::StateOrProvinceName,
            Self::Locality => DnType::LocalityName,
            Self::Organization => DnType::OrganizationName,
            Self::OrganizationalUnit => DnType::OrganizationalUnitName,
        }
    }

    fn from_oid(oid: &Oid<'_>) -> Option<Self> {
        if *oid == OID_X509_COMMON_NAME {
            Some(Self::CommonName)
        } else if *oid == OID_X509_COUNTRY_NAME {
            Some(Self::Country)
        } else if *oid == OID_X509_STATE_OR_PROVINCE_NAME {
            Some(Self::State)
        } else if *oid == OID_X509_LOCALITY_NAME {
            Some(Self::Locality)
        } else if *oid == OID_X509_ORGANIZATION_NAME {
            Some(Self::Organization)
        } else if *oid == OID_X509_ORGANIZATIONAL_UNIT {
            Some(Self::OrganizationalUnit)
        } else {
            None
        }
    }
}

/// One `{name, value}` pair of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAttribute {
    /// Attribute type.
    pub name: AttributeName,
    /// Attribute value.
    pub value: String,
}

impl SubjectAttribute {
    /// Build an attribute.
    pub fn new(name: AttributeName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Ordered sequence of subject attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectAttributes(Vec<SubjectAttribute>);

impl SubjectAttributes {
    /// Build from an ordered list.
    #[must_use]
    pub fn new(attributes: Vec<SubjectAttribute>) -> Self {
        Self(attributes)
    }

    /// Read the attributes of an X.509 name, in encoded order.
    ///
    /// Attribute types outside [`AttributeName`] are skipped. A known
    /// attribute whose value is not a decodable string is an error.
    pub fn from_x509_name(name: &X509Name<'_>) -> Result<Self, String> {
        name.iter_attributes()
            .filter_map(|attr| {
                let kind = AttributeName::from_oid(attr.attr_type())?;
                let value = decode_string(attr.attr_value());
                Some(value.map(|value| SubjectAttribute::new(kind, value)))
            })
            .collect()
    }

    /// First value of the given attribute type.
    #[must_use]
    pub fn get(&self, name: AttributeName) -> Option<&str> {
        self.0
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// First common name, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.get(AttributeName::CommonName)
    }

    /// A copy with `cn` as the leading common name.
    ///
    /// Any common name already present is dropped.
    #[must_use]
    pub fn with_common_name(&self, cn: &str) -> Self {
        let mut attributes = vec![SubjectAttribute::new(AttributeName::CommonName, cn)];
        attributes.extend(
            self.0
                .iter()
                .filter(|attr| attr.name != AttributeName::CommonName)
                .cloned(),
        );
        Self(attributes)
    }

    /// Iterate in order.
    pub fn iter(&self) -> impl Iterator<Item = &SubjectAttribute> {
        self.0.iter()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no attribute is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into an `rcgen` distinguished name, preserving order.
    #[must_use]
    pub fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        for attr in &self.0 {
            let value = match attr.name {
                AttributeName::Country => PrintableString::try_from(attr.value.as_str())
                    .map_or_else(
                        |_| DnValue::Utf8String(attr.value.clone()),
                        DnValue::PrintableString,
                    ),
                _ => DnValue::Utf8String(attr.value.clone()),
            };
            dn.push(attr.name.dn_type(), value);
        }
        dn
    }
}

/// Decode a directory string value.
fn decode_string(value: &Any<'_>) -> Result<String, String> {
    let data = value.data;
    let decoded = match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::NumericString => {
            std::str::from_utf8(data).ok().map(str::to_owned)
        }
        Tag::BmpString if data.len() % 2 == 0 => {
            let units = data.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]]));
            char::decode_utf16(units).collect::<Result<String, _>>().ok()
        }
        Tag::UniversalString if data.len() % 4 == 0 => data
            .chunks_exact(4)
            .map(|c| char::from_u32(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
            .collect::<Option<String>>(),
        _ => None,
    };
    decoded.ok_or_else(|| format!("unsupported string type in subject ({:?})", value.tag()))
}

impl FromIterator<SubjectAttribute> for SubjectAttributes {
    fn from_iter<I: IntoIterator<Item = SubjectAttribute>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for SubjectAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", attr.name.short_name(), attr.value)?;
        }
        Ok(())
    }
}
