//! Host bindings
//!
//! A [`Binding`] is one desired `hostname.domain → IPv4` mapping as declared
//! by the host configuration. A [`BindingSet`] is the validated collection
//! fetched at the start of a cycle: keys are unique, and every hostname and
//! domain is a plain DNS name (labels of letters, digits, `-` and `_`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Reverse lookup suffix for IPv4 PTR records
pub const REVERSE_ZONE_SUFFIX: &str = "in-addr.arpa";

/// RFC 1035 label limit
const MAX_LABEL_LEN: usize = 63;

/// RFC 1035 name limit, without the trailing dot
const MAX_NAME_LEN: usize = 253;

/// Identity of a binding: `(domain, hostname)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    /// DNS zone suffix (e.g. "lan.example.com")
    pub domain: String,
    /// Record label within the zone (e.g. "printer")
    pub hostname: String,
}

impl BindingKey {
    pub fn new(domain: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            hostname: hostname.into(),
        }
    }

    /// Fully qualified owner name, with trailing dot
    pub fn fqdn(&self) -> String {
        format!(
            "{}.{}.",
            self.hostname,
            self.domain.trim_end_matches('.')
        )
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.hostname, self.domain.trim_end_matches('.'))
    }
}

/// One desired hostname → address mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub key: BindingKey,
    pub address: Ipv4Addr,
}

impl Binding {
    pub fn new(domain: impl Into<String>, hostname: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            key: BindingKey::new(domain, hostname),
            address,
        }
    }

    pub fn domain(&self) -> &str {
        &self.key.domain
    }

    pub fn hostname(&self) -> &str {
        &self.key.hostname
    }

    /// Fully qualified forward name, e.g. `host1.example.com.`
    pub fn fqdn(&self) -> String {
        self.key.fqdn()
    }

    /// Reverse lookup name of this binding's address
    pub fn reverse_name(&self, suffix: &str) -> String {
        reverse_name(self.address, suffix)
    }

    fn validate(&self) -> Result<()> {
        if self.key.domain.trim().is_empty() {
            return Err(Error::config_parse(format!(
                "binding for host '{}' ({}) has an empty domain",
                self.key.hostname, self.address
            )));
        }
        if self.key.hostname.trim().is_empty() {
            return Err(Error::config_parse(format!(
                "binding for {} in domain '{}' has an empty hostname",
                self.address, self.key.domain
            )));
        }

        let domain = self.key.domain.trim_end_matches('.');
        validate_name(domain).map_err(|reason| {
            Error::config_parse(format!(
                "binding for {} has an invalid domain {:?}: {}",
                self.address, self.key.domain, reason
            ))
        })?;
        validate_name(&self.key.hostname).map_err(|reason| {
            Error::config_parse(format!(
                "binding for {} has an invalid hostname {:?}: {}",
                self.address, self.key.hostname, reason
            ))
        })?;

        let fqdn_len = self.key.hostname.len() + 1 + domain.len();
        if fqdn_len > MAX_NAME_LEN {
            return Err(Error::config_parse(format!(
                "name {} is too long: {} chars (max {})",
                self.key, fqdn_len, MAX_NAME_LEN
            )));
        }
        Ok(())
    }
}

/// Check that `name` is a dot-separated sequence of plain labels
///
/// Anything else (whitespace, control characters, quotes, empty labels)
/// would corrupt the update script the name is written into.
fn validate_name(name: &str) -> std::result::Result<(), String> {
    for label in name.split('.') {
        if label.is_empty() {
            return Err("empty label".to_string());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(format!(
                "label '{}' is {} chars (max {})",
                label,
                label.len(),
                MAX_LABEL_LEN
            ));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(format!("character {:?} is not allowed", c));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' starts or ends with a hyphen", label));
        }
    }
    Ok(())
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.address)
    }
}

/// Reverse lookup name for an IPv4 address: octets reversed plus `suffix`
///
/// `reverse_name(10.0.0.2, "in-addr.arpa")` is `2.0.0.10.in-addr.arpa.`
pub fn reverse_name(address: Ipv4Addr, suffix: &str) -> String {
    let [a, b, c, d] = address.octets();
    format!("{d}.{c}.{b}.{a}.{}.", suffix.trim_matches('.'))
}

/// Validated set of bindings with unique keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    bindings: BTreeMap<BindingKey, Ipv4Addr>,
}

impl BindingSet {
    /// Build a set, rejecting empty fields and duplicate keys
    pub fn new(bindings: impl IntoIterator<Item = Binding>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for binding in bindings {
            binding.validate()?;
            let address = binding.address;
            if let Some(previous) = map.insert(binding.key.clone(), address) {
                return Err(Error::config_parse(format!(
                    "duplicate binding for {}: {} and {}",
                    binding.key, previous, address
                )));
            }
        }
        Ok(Self { bindings: map })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn contains(&self, key: &BindingKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn address_of(&self, key: &BindingKey) -> Option<Ipv4Addr> {
        self.bindings.get(key).copied()
    }

    /// Bindings in key order
    pub fn iter(&self) -> impl Iterator<Item = Binding> + '_ {
        self.bindings.iter().map(|(key, address)| Binding {
            key: key.clone(),
            address: *address,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &BindingKey> {
        self.bindings.keys()
    }
}
