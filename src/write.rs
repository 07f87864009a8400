//! The hooked write path.
//!
//! Every mutation of zone data goes through these functions. Conflict
//! validation runs before a record row is written; PTR synchronization and
//! template propagation run right after the row changes. Everything happens
//! inside the caller's [`Tx`], so a failing hook rolls back the triggering
//! write as well.

use tracing::{debug, info};

use crate::autoptr;
use crate::conflicts;
use crate::error::{DnsaasError, Result};
use crate::metrics;
use crate::model::{
    Domain, DomainData, DomainId, DomainTemplate, DomainTemplateData, DomainTemplateId,
    EntityRef, Record, RecordData, RecordId, RecordTemplate, RecordTemplateData,
    RecordTemplateId,
};
use crate::store::{unix_now, Tx};
use crate::templates;
use crate::validators;

// --- Records ---

/// Insert a record and synchronize its PTR.
pub fn create_record(tx: &Tx<'_>, mut data: RecordData) -> Result<Record> {
    prepare_record(tx, &mut data, None)?;
    let id = tx.insert_record_row(&data)?;
    let record = Record { id, data };
    debug!(%id, record = %record, "record created");

    autoptr::on_record_saved(tx, &record, None)?;
    Ok(record)
}

/// Rewrite a stored record and re-synchronize its PTR against the values
/// it had before this call.
pub fn update_record(tx: &Tx<'_>, mut record: Record) -> Result<Record> {
    let previous = tx.record(record.id)?;
    prepare_record(tx, &mut record.data, Some(record.id))?;
    tx.update_record_row(&record)?;
    debug!(id = %record.id, record = %record, "record updated");

    autoptr::on_record_saved(tx, &record, Some(&previous))?;
    Ok(record)
}

/// Delete a record together with the records depending on it, then advance
/// the domain's SOA change date.
pub fn delete_record(tx: &Tx<'_>, id: RecordId) -> Result<()> {
    let record = tx.record(id)?;
    autoptr::on_record_deleted(tx, &record)?;

    tx.delete_record_row(id)?;
    tx.delete_authorisations(EntityRef::Record(id))?;
    tx.touch_soa(record.data.domain)?;
    debug!(%id, record = %record, "record deleted");
    Ok(())
}

fn prepare_record(tx: &Tx<'_>, data: &mut RecordData, own_id: Option<RecordId>) -> Result<()> {
    check_record(tx, data, own_id)?;
    data.change_date = Some(unix_now());
    Ok(())
}

/// Normalize `data` and check it against the stored records: content
/// grammar, CNAME exclusivity and `(name, type, content)` uniqueness.
pub(crate) fn check_record(tx: &Tx<'_>, data: &mut RecordData, own_id: Option<RecordId>) -> Result<()> {
    data.name = data.name.trim().to_ascii_lowercase();
    data.content = data.content.trim().to_string();

    validators::validate_domain_name(&data.name)?;
    validators::validate_record_content(data.record_type, &data.content)?;
    conflicts::validate_for_conflicts(tx, data, own_id)?;

    if let Some(existing) = tx.find_record(&data.name, data.record_type, &data.content)? {
        if Some(existing.id) != own_id {
            metrics::record_conflict();
            return Err(DnsaasError::Conflict {
                ids: vec![existing.id],
            });
        }
    }
    Ok(())
}

// --- Domains ---

/// Insert a domain and materialize its template.
pub fn create_domain(tx: &Tx<'_>, mut data: DomainData) -> Result<Domain> {
    check_domain(tx, &mut data, None)?;
    let id = tx.insert_domain_row(&data)?;
    let domain = Domain { id, data };
    info!(%id, name = %domain.data.name, "domain created");

    templates::on_domain_saved(tx, &domain)?;
    Ok(domain)
}

/// Rewrite a stored domain. Re-applies its template and, when the
/// `auto_ptr` policy changed, re-evaluates the PTRs of every A/AAAA record.
pub fn update_domain(tx: &Tx<'_>, mut domain: Domain) -> Result<Domain> {
    let previous = tx.domain(domain.id)?;
    check_domain(tx, &mut domain.data, Some(domain.id))?;
    tx.update_domain_row(&domain)?;
    debug!(id = %domain.id, name = %domain.data.name, "domain updated");

    templates::on_domain_saved(tx, &domain)?;
    if previous.data.auto_ptr != domain.data.auto_ptr {
        info!(
            name = %domain.data.name,
            from = %previous.data.auto_ptr,
            to = %domain.data.auto_ptr,
            "auto_ptr policy changed"
        );
        autoptr::resync_domain(tx, &domain)?;
    }
    Ok(domain)
}

/// Delete a domain and all of its records.
pub fn delete_domain(tx: &Tx<'_>, id: DomainId) -> Result<()> {
    let domain = tx.domain(id)?;
    for record in tx.records_in_domain(id)? {
        // Already gone when it was the PTR of an earlier record.
        if tx.find_record_by_id(record.id)?.is_some() {
            delete_record(tx, record.id)?;
        }
    }
    tx.delete_authorisations(EntityRef::Domain(id))?;
    tx.delete_domain_row(id)?;
    info!(%id, name = %domain.data.name, "domain deleted");
    Ok(())
}

/// Normalize `data` and check its name is well-formed and free.
pub(crate) fn check_domain(tx: &Tx<'_>, data: &mut DomainData, own_id: Option<DomainId>) -> Result<()> {
    data.name = data.name.trim().to_ascii_lowercase();
    validators::validate_domain_name(&data.name)?;

    if let Some(existing) = tx.find_domain_by_name(&data.name)? {
        if Some(existing.id) != own_id {
            return Err(DnsaasError::Validation(format!(
                "Domain {} already exists",
                data.name
            )));
        }
    }
    Ok(())
}

// --- Templates ---

/// Insert a domain template.
pub fn create_domain_template(tx: &Tx<'_>, data: DomainTemplateData) -> Result<DomainTemplate> {
    if tx.find_domain_template(&data.name)?.is_some() {
        return Err(DnsaasError::Validation(format!(
            "Domain template {} already exists",
            data.name
        )));
    }
    let id = tx.insert_domain_template_row(&data)?;
    debug!(%id, name = %data.name, "domain template created");
    Ok(DomainTemplate { id, data })
}

/// Rewrite a domain template's own columns.
pub fn update_domain_template(tx: &Tx<'_>, template: DomainTemplate) -> Result<DomainTemplate> {
    if let Some(existing) = tx.find_domain_template(&template.data.name)? {
        if existing.id != template.id {
            return Err(DnsaasError::Validation(format!(
                "Domain template {} already exists",
                template.data.name
            )));
        }
    }
    tx.update_domain_template_row(&template)?;
    Ok(template)
}

/// Delete a domain template. Bound domains are detached and the records
/// generated from its record templates are removed.
pub fn delete_domain_template(tx: &Tx<'_>, id: DomainTemplateId) -> Result<()> {
    let template = tx.domain_template(id)?;
    tx.detach_domain_template(id)?;
    for record_template in tx.record_templates_of(id)? {
        delete_record_template(tx, record_template.id)?;
    }
    tx.delete_domain_template_row(id)?;
    info!(%id, name = %template.data.name, "domain template deleted");
    Ok(())
}

/// Insert a record template and materialize it under every bound domain.
pub fn create_record_template(tx: &Tx<'_>, data: RecordTemplateData) -> Result<RecordTemplate> {
    templates::validate_template(&data)?;
    tx.domain_template(data.domain_template)?;

    let id = tx.insert_record_template_row(&data)?;
    let template = RecordTemplate { id, data };
    debug!(%id, "record template created");

    templates::on_record_template_created(tx, &template)?;
    Ok(template)
}

/// Rewrite a record template and push the new values to its instances.
pub fn update_record_template(tx: &Tx<'_>, template: RecordTemplate) -> Result<RecordTemplate> {
    templates::validate_template(&template.data)?;
    let previous = tx.record_template(template.id)?;
    tx.domain_template(template.data.domain_template)?;

    tx.update_record_template_row(&template)?;
    templates::on_record_template_updated(tx, &template, &previous)?;
    Ok(template)
}

/// Delete a record template and the records generated from it.
pub fn delete_record_template(tx: &Tx<'_>, id: RecordTemplateId) -> Result<()> {
    tx.record_template(id)?;
    templates::on_record_template_deleted(tx, id)?;
    tx.delete_record_template_row(id)?;
    debug!(%id, "record template deleted");
    Ok(())
}
