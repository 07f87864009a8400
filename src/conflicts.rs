//! CNAME exclusivity.
//!
//! A name carrying a CNAME may carry nothing else. The check runs on every
//! record write, including the ones issued by PTR synchronization and
//! template propagation.

use tracing::debug;

use crate::error::{DnsaasError, Result};
use crate::metrics;
use crate::model::{RecordData, RecordId, RecordType};
use crate::store::Tx;

/// Ids of the records `candidate` would collide with. `own_id` is the id of
/// the record being updated, excluded from the comparison.
pub fn find_conflicts(
    tx: &Tx<'_>,
    candidate: &RecordData,
    own_id: Option<RecordId>,
) -> Result<Vec<RecordId>> {
    let conflicting = tx
        .records_named(&candidate.name)?
        .into_iter()
        .filter(|other| Some(other.id) != own_id)
        .filter(|other| {
            candidate.record_type == RecordType::Cname
                || other.data.record_type == RecordType::Cname
        })
        .map(|other| other.id)
        .collect();
    Ok(conflicting)
}

/// Fail with [`DnsaasError::Conflict`] when `candidate` breaks CNAME
/// exclusivity.
pub fn validate_for_conflicts(
    tx: &Tx<'_>,
    candidate: &RecordData,
    own_id: Option<RecordId>,
) -> Result<()> {
    let ids = find_conflicts(tx, candidate, own_id)?;
    if ids.is_empty() {
        return Ok(());
    }
    debug!(
        name = %candidate.name,
        record_type = %candidate.record_type,
        ?ids,
        "record conflicts with existing records"
    );
    metrics::record_conflict();
    Err(DnsaasError::Conflict { ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::model::DomainData;
    use crate::store::Store;

    #[test]
    fn test_cname_blocks_other_types_and_vice_versa() {
        let store = Store::in_memory(WorkflowConfig::default()).unwrap();
        store
            .transaction(|tx| {
                let domain = tx.insert_domain_row(&DomainData::new("example.com"))?;
                let a = tx.insert_record_row(&RecordData::new(
                    domain,
                    "x.example.com",
                    RecordType::A,
                    "10.0.0.1",
                ))?;

                let cname =
                    RecordData::new(domain, "x.example.com", RecordType::Cname, "y.example.com");
                assert_eq!(find_conflicts(tx, &cname, None)?, vec![a]);

                let cname_id = tx.insert_record_row(&RecordData::new(
                    domain,
                    "c.example.com",
                    RecordType::Cname,
                    "y.example.com",
                ))?;
                let txt = RecordData::new(domain, "c.example.com", RecordType::Txt, "hello");
                assert_eq!(find_conflicts(tx, &txt, None)?, vec![cname_id]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_record_does_not_conflict_with_itself() {
        let store = Store::in_memory(WorkflowConfig::default()).unwrap();
        store
            .transaction(|tx| {
                let domain = tx.insert_domain_row(&DomainData::new("example.com"))?;
                let data =
                    RecordData::new(domain, "c.example.com", RecordType::Cname, "y.example.com");
                let id = tx.insert_record_row(&data)?;

                assert!(validate_for_conflicts(tx, &data, Some(id)).is_ok());
                assert!(matches!(
                    validate_for_conflicts(tx, &data, None),
                    Err(DnsaasError::Conflict { .. })
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_non_cname_records_coexist() {
        let store = Store::in_memory(WorkflowConfig::default()).unwrap();
        store
            .transaction(|tx| {
                let domain = tx.insert_domain_row(&DomainData::new("example.com"))?;
                tx.insert_record_row(&RecordData::new(
                    domain,
                    "example.com",
                    RecordType::A,
                    "10.0.0.1",
                ))?;
                let mx = RecordData::new(domain, "example.com", RecordType::Mx, "mx.example.com");
                assert!(find_conflicts(tx, &mx, None)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
