//! Template propagation.
//!
//! A domain bound to a [`DomainTemplate`](crate::model::DomainTemplate)
//! carries exactly one generated record per child [`RecordTemplate`].
//! Record templates use `{domain-name}` placeholders in `name` and
//! `content`; `{{` and `}}` produce literal braces.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{DnsaasError, Result};
use crate::metrics::{self, SyncAction};
use crate::model::{
    Domain, DomainTemplate, Record, RecordData, RecordTemplate, RecordTemplateData,
    RecordTemplateId,
};
use crate::requests::DomainStage;
use crate::store::Tx;
use crate::write;

const DOMAIN_NAME: &str = "domain-name";

/// Fill the domain settings a new domain leaves unset from the template it
/// binds to: its kind, PTR policy and unrestricted flag.
pub fn prefill_domain(template: &DomainTemplate, stage: &mut DomainStage) {
    if stage.domain_type.is_none() {
        stage.domain_type = template.data.domain_type;
    }
    stage.auto_ptr.get_or_insert(template.data.auto_ptr);
    stage.unrestricted.get_or_insert(template.data.unrestricted);
}

/// Substitute placeholders in `pattern` for a domain named `domain_name`.
pub fn substitute(pattern: &str, domain_name: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() + domain_name.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => key.push(c),
                        None => {
                            return Err(DnsaasError::Validation(format!(
                                "Unterminated placeholder in {pattern:?}"
                            )))
                        }
                    }
                }
                if key != DOMAIN_NAME {
                    return Err(DnsaasError::Validation(format!(
                        "Unknown placeholder {{{key}}} in {pattern:?}"
                    )));
                }
                out.push_str(domain_name);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(DnsaasError::Validation(format!(
                    "Single '}}' in {pattern:?}"
                )))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Reject templates whose patterns cannot be rendered.
pub fn validate_template(data: &RecordTemplateData) -> Result<()> {
    substitute(&data.name, DOMAIN_NAME)?;
    substitute(&data.content, DOMAIN_NAME)?;
    Ok(())
}

/// Overwrite the template-sourced fields of `record` with `template`
/// rendered for `domain`. Returns whether anything changed.
fn apply(template: &RecordTemplate, domain: &Domain, record: &mut RecordData) -> Result<bool> {
    let name = substitute(&template.data.name, &domain.data.name)?;
    let content = substitute(&template.data.content, &domain.data.name)?;

    let before = record.clone();
    record.domain = domain.id;
    record.record_type = template.data.record_type;
    record.name = name;
    record.content = content;
    record.ttl = template.data.ttl;
    record.prio = template.data.prio;
    record.auth = template.data.auth;
    record.template = Some(template.id);
    Ok(*record != before)
}

/// Get-or-update the instance of `template` under `domain`, keyed on the
/// rendered `(type, name, content)`.
fn materialize(tx: &Tx<'_>, template: &RecordTemplate, domain: &Domain) -> Result<Record> {
    let name = substitute(&template.data.name, &domain.data.name)?;
    let content = substitute(&template.data.content, &domain.data.name)?;

    if let Some(existing) = tx.find_record(&name, template.data.record_type, &content)? {
        let mut record = existing.clone();
        if !apply(template, domain, &mut record.data)? {
            return Ok(existing);
        }
        let record = write::update_record(tx, record)?;
        metrics::record_template_record(SyncAction::Updated);
        return Ok(record);
    }

    let mut data = RecordData::new(domain.id, name, template.data.record_type, content);
    data.owner = domain.data.owner;
    data.service = domain.data.service;
    apply(template, domain, &mut data)?;
    let record = write::create_record(tx, data)?;
    debug!(domain = %domain.data.name, record = %record, "materialized templated record");
    metrics::record_template_record(SyncAction::Created);
    Ok(record)
}

/// Post-save hook of a domain: converge its templated records to its
/// template. No-op when the domain has no template or already matches it.
pub(crate) fn on_domain_saved(tx: &Tx<'_>, domain: &Domain) -> Result<()> {
    let Some(template_id) = domain.data.template else {
        return Ok(());
    };

    for foreign in tx.foreign_templated_records(domain.id, template_id)? {
        if tx.find_record_by_id(foreign.id)?.is_none() {
            continue;
        }
        debug!(domain = %domain.data.name, record = %foreign, "removing record of another template");
        write::delete_record(tx, foreign.id)?;
        metrics::record_template_record(SyncAction::Deleted);
    }

    let existing: HashSet<RecordTemplateId> =
        tx.instantiated_templates(domain.id)?.into_iter().collect();
    for template in tx.record_templates_of(template_id)? {
        if !existing.contains(&template.id) {
            materialize(tx, &template, domain)?;
        }
    }
    Ok(())
}

/// Materialize a new record template under every bound domain.
pub(crate) fn on_record_template_created(tx: &Tx<'_>, template: &RecordTemplate) -> Result<()> {
    for domain in tx.domains_with_template(template.data.domain_template)? {
        materialize(tx, template, &domain)?;
    }
    Ok(())
}

/// Push a modified record template to its instances.
pub(crate) fn on_record_template_updated(
    tx: &Tx<'_>,
    template: &RecordTemplate,
    previous: &RecordTemplate,
) -> Result<()> {
    if template.data.domain_template != previous.data.domain_template {
        // Moved to another domain template: the old bindings no longer apply.
        on_record_template_deleted(tx, template.id)?;
        return on_record_template_created(tx, template);
    }

    for mut record in tx.records_of_template(template.id)? {
        let domain = tx.domain(record.data.domain)?;
        if apply(template, &domain, &mut record.data)? {
            write::update_record(tx, record)?;
            metrics::record_template_record(SyncAction::Updated);
        }
    }
    Ok(())
}

/// Delete every record generated from a record template.
pub(crate) fn on_record_template_deleted(tx: &Tx<'_>, template: RecordTemplateId) -> Result<()> {
    for record in tx.records_of_template(template)? {
        if tx.find_record_by_id(record.id)?.is_none() {
            continue;
        }
        write::delete_record(tx, record.id)?;
        metrics::record_template_record(SyncAction::Deleted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_domain_name() {
        assert_eq!(
            substitute("www.{domain-name}", "example.com").unwrap(),
            "www.example.com"
        );
        assert_eq!(
            substitute(
                "ns1.{domain-name} hostmaster.{domain-name} 0 43200 600 1209600 600",
                "example.com"
            )
            .unwrap(),
            "ns1.example.com hostmaster.example.com 0 43200 600 1209600 600"
        );
    }

    #[test]
    fn test_substitute_escaped_braces() {
        assert_eq!(
            substitute("v=spf1 {{literal}} {domain-name}", "example.com").unwrap(),
            "v=spf1 {literal} example.com"
        );
    }

    #[test]
    fn test_substitute_rejects_unknown_placeholders() {
        assert!(substitute("{domain}", "example.com").is_err());
        assert!(substitute("{domain-name", "example.com").is_err());
        assert!(substitute("a}b", "example.com").is_err());
    }
}
