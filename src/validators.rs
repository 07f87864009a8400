//! Field validation for domains and records.
//!
//! PowerDNS treats a whole zone as broken when a record name ends with a
//! period, so names must parse as DNS names and additionally carry no
//! trailing dot. SOA bodies are the exception: their nameserver and mailbox
//! fields are conventionally fully qualified.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::Name;

use crate::error::{DnsaasError, Result};
use crate::model::RecordType;

/// Validate a hostname. It must parse as a DNS name, carry no trailing dot,
/// and keep labels to letters, digits, `-` and `_` with no label ending in
/// `-`. A leading `*` label is accepted for wildcard records.
pub fn validate_domain_name(name: &str) -> Result<Name> {
    if name.is_empty() {
        return Err(DnsaasError::Validation("Name must not be empty".into()));
    }
    if name.ends_with('.') {
        return Err(DnsaasError::Validation(format!(
            "Name {name} must not end with a period"
        )));
    }
    let parsed = Name::from_ascii(name)
        .map_err(|e| DnsaasError::Validation(format!("Invalid name {name}: {e}")))?;

    for (index, label) in name.split('.').enumerate() {
        if index == 0 && label == "*" {
            continue;
        }
        if !is_plain_label(label) {
            return Err(DnsaasError::Validation(format!(
                "Invalid label {label:?} in name {name}"
            )));
        }
    }
    Ok(parsed)
}

fn is_plain_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parse the content of an A or AAAA record.
pub fn parse_address(record_type: RecordType, content: &str) -> Result<IpAddr> {
    match record_type {
        RecordType::A => content
            .parse::<Ipv4Addr>()
            .map(IpAddr::V4)
            .map_err(|_| DnsaasError::InvalidAddress(format!("{content} is not an IPv4 address"))),
        RecordType::Aaaa => content
            .parse::<Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| DnsaasError::InvalidAddress(format!("{content} is not an IPv6 address"))),
        other => Err(DnsaasError::InvalidAddress(format!(
            "{other} records do not carry an address"
        ))),
    }
}

/// Validate `content` for the given record type.
pub fn validate_record_content(record_type: RecordType, content: &str) -> Result<()> {
    match record_type {
        RecordType::A | RecordType::Aaaa => {
            parse_address(record_type, content).map_err(|e| match e {
                DnsaasError::InvalidAddress(msg) => DnsaasError::Validation(msg),
                other => other,
            })?;
        }
        RecordType::Cname | RecordType::Ns | RecordType::Ptr => {
            validate_domain_name(content)?;
        }
        RecordType::Mx => {
            // Accept both "mx.example.com" and the inline "10 mx.example.com".
            let target = match content.split_once(' ') {
                Some((prio, host)) if prio.parse::<u32>().is_ok() => host,
                _ => content,
            };
            validate_domain_name(target)?;
        }
        RecordType::Soa => validate_soa_content(content)?,
        _ => {}
    }
    Ok(())
}

/// SOA body: `mname rname serial refresh retry expire minimum`.
pub fn validate_soa_content(content: &str) -> Result<()> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() != 7 {
        return Err(DnsaasError::Validation(format!(
            "SOA content must have 7 fields, got {}",
            fields.len()
        )));
    }

    for name in &fields[..2] {
        validate_domain_name(name.strip_suffix('.').unwrap_or(name))
            .map_err(|_| DnsaasError::Validation(format!("Invalid SOA name {name}")))?;
    }
    for number in &fields[2..] {
        number
            .parse::<u32>()
            .map_err(|_| DnsaasError::Validation(format!("Invalid SOA number {number}")))?;
    }
    Ok(())
}

/// Public domains may not point A records at private IPv4 space.
pub fn validate_public_address(content: &str) -> Result<()> {
    match content.parse::<Ipv4Addr>() {
        Ok(addr) if addr.is_private() => Err(DnsaasError::Validation(format!(
            "IP address {content} cannot be private"
        ))),
        _ => Ok(()),
    }
}
