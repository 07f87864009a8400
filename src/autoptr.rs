//! Automatic PTR maintenance for A and AAAA records.
//!
//! Each address record owns at most one PTR, linked back through
//! `depends_on`. Which PTR it owns is a pure function of the record's
//! content and name, the effective [`AutoPtr`] policy, and whether the
//! reverse zone is managed here. The hooks below are called by the write
//! path after the source row changed and converge the PTR to that state.

use std::net::IpAddr;

use hickory_proto::rr::Name;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::{self, SyncAction};
use crate::model::{AutoPtr, Domain, DomainData, DomainTemplateId, Record, RecordData, RecordType};
use crate::store::Tx;
use crate::validators::parse_address;
use crate::write;

/// Split the reverse name of `addr` into its reverse zone and the label
/// the PTR gets inside that zone.
///
/// IPv4 zones are the /24 (`1.168.192.in-addr.arpa`, label `1`); IPv6
/// zones hold every nibble but the last.
pub fn reverse_zone_and_label(addr: IpAddr) -> (String, String) {
    let pointer = Name::from(addr);
    let label = pointer
        .iter()
        .next()
        .map(|label| String::from_utf8_lossy(label).into_owned())
        .unwrap_or_default();
    (unqualified(&pointer.base_name()), label)
}

/// Reverse name of `addr`, without the trailing dot.
pub fn reverse_pointer(addr: IpAddr) -> String {
    unqualified(&Name::from(addr))
}

fn unqualified(name: &Name) -> String {
    name.to_ascii().trim_end_matches('.').to_owned()
}

/// The record's own policy if set, otherwise its domain's.
pub fn effective_policy(record: &RecordData, domain: &Domain) -> AutoPtr {
    record.auto_ptr.unwrap_or(domain.data.auto_ptr)
}

/// Post-save hook: converge the PTR of `record`. `previous` is the row as
/// it was before the save, `None` on creation.
pub(crate) fn on_record_saved(tx: &Tx<'_>, record: &Record, previous: Option<&Record>) -> Result<()> {
    let was_address = previous.is_some_and(|p| p.data.record_type.is_address());
    if !record.data.record_type.is_address() && !was_address {
        return Ok(());
    }
    let domain = tx.domain(record.data.domain)?;
    sync_record(tx, record, &domain, previous)
}

/// Pre-delete hook: drop every record depending on `record`.
pub(crate) fn on_record_deleted(tx: &Tx<'_>, record: &Record) -> Result<()> {
    for dependent in tx.dependents_of(record.id)? {
        debug!(source = %record, ptr = %dependent, "deleting dependent record");
        write::delete_record(tx, dependent.id)?;
        metrics::record_ptr_sync(SyncAction::Deleted);
    }
    Ok(())
}

/// Re-evaluate every A/AAAA record of `domain`.
pub fn resync_domain(tx: &Tx<'_>, domain: &Domain) -> Result<()> {
    let records = tx.address_records_in_domain(domain.id)?;
    info!(domain = %domain.data.name, count = records.len(), "re-synchronizing PTR records");
    for record in records {
        sync_record(tx, &record, domain, None)?;
    }
    Ok(())
}

fn sync_record(
    tx: &Tx<'_>,
    record: &Record,
    domain: &Domain,
    previous: Option<&Record>,
) -> Result<()> {
    if !record.data.record_type.is_address() {
        return remove_ptrs(tx, record, previous);
    }

    let addr = parse_address(record.data.record_type, &record.data.content)?;
    let (zone, label) = reverse_zone_and_label(addr);

    let reverse = match effective_policy(&record.data, domain) {
        AutoPtr::Never => None,
        AutoPtr::Always => Some(get_or_create_reverse_domain(tx, &zone, domain)?),
        AutoPtr::OnlyIfDomain => tx.find_domain_by_name(&zone)?,
    };
    let Some(reverse) = reverse else {
        debug!(record = %record, %zone, "no PTR wanted for record");
        metrics::record_ptr_sync(SyncAction::Skipped);
        return remove_ptrs(tx, record, previous);
    };

    let ptr_name = format!("{label}.{zone}");
    let existing = tx.find_record(&ptr_name, RecordType::Ptr, &record.data.name)?;
    let keep = existing.as_ref().map(|ptr| ptr.id);

    for stale in stale_ptrs(tx, record, previous)? {
        if Some(stale.id) != keep {
            debug!(source = %record, ptr = %stale, "deleting stale PTR");
            write::delete_record(tx, stale.id)?;
            metrics::record_ptr_sync(SyncAction::Deleted);
        }
    }

    match existing {
        Some(ptr) => {
            let mut updated = ptr.clone();
            updated.data.domain = reverse.id;
            apply_inherited(&mut updated.data, record);
            if updated.data != ptr.data {
                write::update_record(tx, updated)?;
                metrics::record_ptr_sync(SyncAction::Updated);
            }
        }
        None => {
            let mut data =
                RecordData::new(reverse.id, ptr_name, RecordType::Ptr, record.data.name.clone());
            apply_inherited(&mut data, record);
            let ptr = write::create_record(tx, data)?;
            debug!(source = %record, ptr = %ptr, "created PTR");
            metrics::record_ptr_sync(SyncAction::Created);
        }
    }
    Ok(())
}

fn apply_inherited(ptr: &mut RecordData, source: &Record) {
    ptr.depends_on = Some(source.id);
    ptr.owner = source.data.owner;
    ptr.ttl = source.data.ttl;
    ptr.disabled = source.data.disabled;
}

/// PTRs the record may have owned before this save: its dependents, plus
/// the PTR derived from its previous name and content.
fn stale_ptrs(tx: &Tx<'_>, record: &Record, previous: Option<&Record>) -> Result<Vec<Record>> {
    let mut stale = tx.dependents_of(record.id)?;

    if let Some(previous) = previous.filter(|p| p.data.record_type.is_address()) {
        if let Some(old) = derived_ptr(tx, &previous.data)? {
            if !stale.iter().any(|r| r.id == old.id) {
                stale.push(old);
            }
        }
    }
    Ok(stale)
}

fn remove_ptrs(tx: &Tx<'_>, record: &Record, previous: Option<&Record>) -> Result<()> {
    let mut doomed = stale_ptrs(tx, record, previous)?;
    if record.data.record_type.is_address() {
        if let Some(current) = derived_ptr(tx, &record.data)? {
            let unowned = current.data.depends_on.is_none();
            if unowned && !doomed.iter().any(|r| r.id == current.id) {
                doomed.push(current);
            }
        }
    }

    for ptr in doomed {
        debug!(source = %record, ptr = %ptr, "deleting PTR");
        write::delete_record(tx, ptr.id)?;
        metrics::record_ptr_sync(SyncAction::Deleted);
    }
    Ok(())
}

/// The PTR matching `data`'s name and content, if one is stored.
fn derived_ptr(tx: &Tx<'_>, data: &RecordData) -> Result<Option<Record>> {
    let Ok(addr) = parse_address(data.record_type, &data.content) else {
        return Ok(None);
    };
    tx.find_record(&reverse_pointer(addr), RecordType::Ptr, &data.name)
}

fn get_or_create_reverse_domain(tx: &Tx<'_>, zone: &str, source: &Domain) -> Result<Domain> {
    if let Some(domain) = tx.find_domain_by_name(zone)? {
        return Ok(domain);
    }

    let mut data = DomainData::new(zone);
    data.domain_type = source.data.domain_type;
    data.template = match source.data.reverse_template {
        Some(id) => Some(id),
        None => default_reverse_template(tx)?,
    };

    let domain = write::create_domain(tx, data)?;
    info!(zone, source = %source.data.name, "created reverse domain");
    Ok(domain)
}

fn default_reverse_template(tx: &Tx<'_>) -> Result<Option<DomainTemplateId>> {
    let Some(name) = tx.settings().default_reverse_template.as_deref() else {
        return Ok(None);
    };
    match tx.find_domain_template(name)? {
        Some(template) => Ok(Some(template.id)),
        None => {
            warn!(template = name, "default reverse template does not exist");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ipv4_reverse_name() {
        let addr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9));
        let (zone, label) = reverse_zone_and_label(addr);
        assert_eq!(zone, "1.168.192.in-addr.arpa");
        assert_eq!(label, "9");
        assert_eq!(reverse_pointer(addr), "9.1.168.192.in-addr.arpa");
    }

    #[test]
    fn test_ipv6_reverse_name() {
        let addr: IpAddr = "2001:db8::1".parse::<Ipv6Addr>().unwrap().into();
        let (zone, label) = reverse_zone_and_label(addr);
        assert_eq!(label, "1");
        assert_eq!(
            zone,
            "0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa"
        );
        assert_eq!(
            reverse_pointer(addr),
            "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa"
        );
    }

    #[test]
    fn test_record_policy_overrides_domain() {
        let mut domain_data = DomainData::new("example.com");
        domain_data.auto_ptr = AutoPtr::Never;
        let domain = Domain {
            id: crate::model::DomainId(1),
            data: domain_data,
        };
        let mut record = RecordData::new(domain.id, "www.example.com", RecordType::A, "10.0.0.1");
        assert_eq!(effective_policy(&record, &domain), AutoPtr::Never);

        record.auto_ptr = Some(AutoPtr::Always);
        assert_eq!(effective_policy(&record, &domain), AutoPtr::Always);
    }
}
