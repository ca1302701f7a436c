// # OPNsense Binding Source
//
// This crate provides a BindingSource reading static DHCP mappings from an
// OPNsense `config.xml`.
//
// ## Layout
//
// Every element with `<staticmap>` children is a DHCP interface block:
//
// ```xml
// <opnsense>
//   <system>
//     <domain>example.com</domain>
//   </system>
//   <dhcpd>
//     <lan>
//       <domain>lan.example.com</domain>
//       <staticmap>
//         <hostname>printer</hostname>
//         <ipaddr>10.0.0.5</ipaddr>
//       </staticmap>
//     </lan>
//   </dhcpd>
// </opnsense>
// ```
//
// The interface's direct `<domain>` child names the zone of its static maps.
// Interfaces without one fall back to `/opnsense/system/domain`.
//
// ## Rules
//
// - A static map with more than one `<hostname>` or `<ipaddr>` is a parse
//   error
// - A static map missing its hostname or address is skipped
// - An address that is not IPv4 is a parse error
// - A static map with no resolvable domain is a parse error
//
// ## Revision
//
// The revision is the file's modification time, so any save from the web
// UI wakes the polling trigger.

use async_trait::async_trait;
use leasesync_core::config::SourceConfig;
use leasesync_core::traits::{BindingSource, Revision};
use leasesync_core::{Binding, Error, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// OPNsense `config.xml` reader
#[derive(Debug, Clone)]
pub struct OpnsenseSource {
    path: PathBuf,
}

impl OpnsenseSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Build from configuration
    pub fn from_config(config: &SourceConfig) -> Self {
        match config {
            SourceConfig::Opnsense { path } => Self::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BindingSource for OpnsenseSource {
    async fn fetch(&self) -> Result<Vec<Binding>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::source(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let bindings = parse_static_maps(&content).map_err(|e| match e {
            Error::ConfigParse(msg) => {
                Error::config_parse(format!("{}: {}", self.path.display(), msg))
            }
            other => other,
        })?;

        debug!(
            "Read {} static mappings from {}",
            bindings.len(),
            self.path.display()
        );
        Ok(bindings)
    }

    async fn revision(&self) -> Result<Option<Revision>> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            Error::source(format!("Failed to stat {}: {}", self.path.display(), e))
        })?;
        let modified = metadata.modified()?;
        Ok(Some(Revision::from_modified(modified)))
    }

    fn source_name(&self) -> &'static str {
        "opnsense"
    }
}

/// Minimal element tree: name, concatenated text and children
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.children_named(name)
            .map(|c| c.text.trim())
            .find(|t| !t.is_empty())
    }
}

fn parse_tree(content: &str) -> Result<Element> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    // Synthetic document node holding the root element
    let mut stack = vec![Element::default()];

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::config_parse(format!(
                "malformed XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(start) => {
                stack.push(Element {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    ..Element::default()
                });
            }
            Event::Empty(empty) => {
                let element = Element {
                    name: String::from_utf8_lossy(empty.name().as_ref()).into_owned(),
                    ..Element::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| Error::config_parse(format!("invalid text: {}", e)))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::config_parse("unbalanced closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Err(Error::config_parse("unbalanced closing tag")),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(Error::config_parse("unexpected end of document"));
    }
    stack
        .pop()
        .ok_or_else(|| Error::config_parse("empty document"))
}

/// Extract every static DHCP mapping from a `config.xml` document
pub fn parse_static_maps(content: &str) -> Result<Vec<Binding>> {
    let document = parse_tree(content)?;

    let system_domain = document
        .children_named("opnsense")
        .flat_map(|root| root.children_named("system"))
        .find_map(|system| system.child_text("domain"))
        .map(str::to_string);

    let mut bindings = Vec::new();
    collect(&document, system_domain.as_deref(), &mut bindings)?;
    Ok(bindings)
}

fn collect(element: &Element, fallback_domain: Option<&str>, out: &mut Vec<Binding>) -> Result<()> {
    if element.children_named("staticmap").next().is_some() {
        let domain = element.child_text("domain").or(fallback_domain);
        for map in element.children_named("staticmap") {
            if let Some(binding) = static_map(&element.name, map, domain)? {
                out.push(binding);
            }
        }
    }

    for child in element.children.iter().filter(|c| c.name != "staticmap") {
        collect(child, fallback_domain, out)?;
    }
    Ok(())
}

fn static_map(interface: &str, map: &Element, domain: Option<&str>) -> Result<Option<Binding>> {
    let hostnames: Vec<&str> = map.children_named("hostname").map(|e| e.text.trim()).collect();
    let addresses: Vec<&str> = map.children_named("ipaddr").map(|e| e.text.trim()).collect();

    if hostnames.len() > 1 {
        return Err(Error::config_parse(format!(
            "static mapping in '{}' has {} hostnames",
            interface,
            hostnames.len()
        )));
    }
    if addresses.len() > 1 {
        return Err(Error::config_parse(format!(
            "static mapping in '{}' has {} addresses",
            interface,
            addresses.len()
        )));
    }

    let hostname = hostnames.first().copied().filter(|h| !h.is_empty());
    let address = addresses.first().copied().filter(|a| !a.is_empty());
    let (hostname, address) = match (hostname, address) {
        (Some(h), Some(a)) => (h, a),
        (h, a) => {
            debug!(
                "Skipping incomplete static mapping in '{}' (hostname={:?}, ipaddr={:?})",
                interface, h, a
            );
            return Ok(None);
        }
    };

    let address: Ipv4Addr = address.parse().map_err(|_| {
        Error::config_parse(format!(
            "static mapping '{}' in '{}' has a non-IPv4 address '{}'",
            hostname, interface, address
        ))
    })?;

    let domain = domain.ok_or_else(|| {
        Error::config_parse(format!(
            "static mapping '{}' in '{}' has no domain and no system domain is set",
            hostname, interface
        ))
    })?;

    Ok(Some(Binding::new(domain, hostname, address)))
}
