//! SQLite-backed zone store.
//!
//! The tables follow the PowerDNS generic SQL layout (`domains`, `records`)
//! so the DNS server can read them directly, extended with the templates,
//! ownership and request tables this crate maintains.
//!
//! [`Store`] is the shared handle; every read and write happens inside a
//! [`Tx`], which wraps exactly one SQLite transaction. Dropping a `Tx`
//! without committing rolls everything back, including the side effects of
//! PTR synchronization and template propagation.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::config::{DatabaseConfig, WorkflowConfig};
use crate::error::{DnsaasError, Result};
use crate::metrics::{self, Timer};
use crate::model::{
    Authorisation, AuthorisationId, Domain, DomainData, DomainId, DomainTemplate,
    DomainTemplateData, DomainTemplateId, EntityRef, OwnershipType, Record, RecordData, RecordId,
    RecordTemplate, RecordTemplateData, RecordTemplateId, RecordType, Service, ServiceId, User,
    UserId,
};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL DEFAULT '',
    is_superuser INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS services (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    uid TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS service_owners (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    ownership_type TEXT NOT NULL,
    UNIQUE (service_id, owner_id, ownership_type)
);

CREATE TABLE IF NOT EXISTS domain_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    type TEXT,
    unrestricted INTEGER NOT NULL DEFAULT 0,
    is_public_domain INTEGER NOT NULL DEFAULT 1,
    auto_ptr TEXT NOT NULL DEFAULT 'ALWAYS'
);

CREATE TABLE IF NOT EXISTS record_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_template_id INTEGER NOT NULL REFERENCES domain_templates(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    ttl INTEGER,
    prio INTEGER,
    auth INTEGER,
    remarks TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    master TEXT,
    last_check INTEGER,
    type TEXT,
    notified_serial INTEGER,
    account TEXT,
    remarks TEXT NOT NULL DEFAULT '',
    template_id INTEGER REFERENCES domain_templates(id) ON DELETE SET NULL,
    reverse_template_id INTEGER REFERENCES domain_templates(id) ON DELETE SET NULL,
    auto_ptr TEXT NOT NULL DEFAULT 'ALWAYS',
    unrestricted INTEGER NOT NULL DEFAULT 0,
    owner_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    service_id INTEGER REFERENCES services(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain_id INTEGER NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    ttl INTEGER,
    prio INTEGER,
    auth INTEGER,
    disabled INTEGER NOT NULL DEFAULT 0,
    remarks TEXT NOT NULL DEFAULT '',
    ordername TEXT,
    change_date INTEGER,
    owner_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    service_id INTEGER REFERENCES services(id) ON DELETE SET NULL,
    depends_on_id INTEGER REFERENCES records(id) ON DELETE SET NULL,
    template_id INTEGER REFERENCES record_templates(id) ON DELETE SET NULL,
    auto_ptr TEXT,
    UNIQUE (name, type, content)
);

CREATE INDEX IF NOT EXISTS records_name_idx ON records(name);
CREATE INDEX IF NOT EXISTS records_domain_idx ON records(domain_id);
CREATE INDEX IF NOT EXISTS records_depends_on_idx ON records(depends_on_id);
CREATE INDEX IF NOT EXISTS records_template_idx ON records(template_id);

CREATE TABLE IF NOT EXISTS authorisations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    authorised_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    target_kind TEXT NOT NULL,
    target_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'OPEN',
    owner_id INTEGER NOT NULL REFERENCES users(id),
    key TEXT,
    last_change TEXT,
    copy_fields TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    domain_id INTEGER,
    record_id INTEGER,
    parent_domain_id INTEGER,
    target_kind TEXT,
    target_id INTEGER,
    target_name TEXT,
    target_type TEXT,
    target_content TEXT,
    target_ttl INTEGER,
    target_prio INTEGER,
    target_auth INTEGER,
    target_disabled INTEGER,
    target_remarks TEXT,
    target_ordername TEXT,
    target_owner INTEGER,
    target_service INTEGER,
    target_auto_ptr TEXT,
    target_master TEXT,
    target_account TEXT,
    target_template INTEGER,
    target_reverse_template INTEGER,
    target_unrestricted INTEGER
);

CREATE INDEX IF NOT EXISTS requests_state_idx ON requests(state);
"#;

const DOMAIN_COLUMNS: &str = "id, name, type, master, account, remarks, template_id, \
     reverse_template_id, auto_ptr, unrestricted, owner_id, service_id";

/// Column indices for [`DOMAIN_COLUMNS`].
mod domain_cols {
    pub const ID: usize = 0;
    pub const NAME: usize = 1;
    pub const TYPE: usize = 2;
    pub const MASTER: usize = 3;
    pub const ACCOUNT: usize = 4;
    pub const REMARKS: usize = 5;
    pub const TEMPLATE: usize = 6;
    pub const REVERSE_TEMPLATE: usize = 7;
    pub const AUTO_PTR: usize = 8;
    pub const UNRESTRICTED: usize = 9;
    pub const OWNER: usize = 10;
    pub const SERVICE: usize = 11;
}

const RECORD_COLUMNS: &str = "id, domain_id, name, type, content, ttl, prio, auth, disabled, \
     remarks, ordername, change_date, owner_id, service_id, depends_on_id, template_id, auto_ptr";

/// Column indices for [`RECORD_COLUMNS`].
mod record_cols {
    pub const ID: usize = 0;
    pub const DOMAIN: usize = 1;
    pub const NAME: usize = 2;
    pub const TYPE: usize = 3;
    pub const CONTENT: usize = 4;
    pub const TTL: usize = 5;
    pub const PRIO: usize = 6;
    pub const AUTH: usize = 7;
    pub const DISABLED: usize = 8;
    pub const REMARKS: usize = 9;
    pub const ORDERNAME: usize = 10;
    pub const CHANGE_DATE: usize = 11;
    pub const OWNER: usize = 12;
    pub const SERVICE: usize = 13;
    pub const DEPENDS_ON: usize = 14;
    pub const TEMPLATE: usize = 15;
    pub const AUTO_PTR: usize = 16;
}

const DOMAIN_TEMPLATE_COLUMNS: &str = "id, name, type, unrestricted, is_public_domain, auto_ptr";

const RECORD_TEMPLATE_COLUMNS: &str =
    "id, domain_template_id, type, name, content, ttl, prio, auth, remarks";

fn parse_domain_row(row: &Row<'_>) -> rusqlite::Result<Domain> {
    Ok(Domain {
        id: row.get(domain_cols::ID)?,
        data: DomainData {
            name: row.get(domain_cols::NAME)?,
            domain_type: row.get(domain_cols::TYPE)?,
            master: row.get(domain_cols::MASTER)?,
            account: row.get(domain_cols::ACCOUNT)?,
            remarks: row.get(domain_cols::REMARKS)?,
            template: row.get(domain_cols::TEMPLATE)?,
            reverse_template: row.get(domain_cols::REVERSE_TEMPLATE)?,
            auto_ptr: row.get(domain_cols::AUTO_PTR)?,
            unrestricted: row.get(domain_cols::UNRESTRICTED)?,
            owner: row.get(domain_cols::OWNER)?,
            service: row.get(domain_cols::SERVICE)?,
        },
    })
}

fn parse_record_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(record_cols::ID)?,
        data: RecordData {
            domain: row.get(record_cols::DOMAIN)?,
            name: row.get(record_cols::NAME)?,
            record_type: row.get(record_cols::TYPE)?,
            content: row.get(record_cols::CONTENT)?,
            ttl: row.get(record_cols::TTL)?,
            prio: row.get(record_cols::PRIO)?,
            auth: row.get(record_cols::AUTH)?,
            disabled: row.get(record_cols::DISABLED)?,
            remarks: row.get(record_cols::REMARKS)?,
            ordername: row.get(record_cols::ORDERNAME)?,
            change_date: row.get(record_cols::CHANGE_DATE)?,
            owner: row.get(record_cols::OWNER)?,
            service: row.get(record_cols::SERVICE)?,
            depends_on: row.get(record_cols::DEPENDS_ON)?,
            template: row.get(record_cols::TEMPLATE)?,
            auto_ptr: row.get(record_cols::AUTO_PTR)?,
        },
    })
}

fn parse_domain_template_row(row: &Row<'_>) -> rusqlite::Result<DomainTemplate> {
    Ok(DomainTemplate {
        id: row.get(0)?,
        data: DomainTemplateData {
            name: row.get(1)?,
            domain_type: row.get(2)?,
            unrestricted: row.get(3)?,
            is_public_domain: row.get(4)?,
            auto_ptr: row.get(5)?,
        },
    })
}

fn parse_record_template_row(row: &Row<'_>) -> rusqlite::Result<RecordTemplate> {
    Ok(RecordTemplate {
        id: row.get(0)?,
        data: RecordTemplateData {
            domain_template: row.get(1)?,
            record_type: row.get(2)?,
            name: row.get(3)?,
            content: row.get(4)?,
            ttl: row.get(5)?,
            prio: row.get(6)?,
            auth: row.get(7)?,
            remarks: row.get(8)?,
        },
    })
}

fn parse_user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_superuser: row.get(3)?,
    })
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Thread-safe handle to the zone database.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    conn: Mutex<Connection>,
    settings: WorkflowConfig,
}

impl Store {
    /// Open (and create if needed) the database named in the configuration.
    pub fn open(database: &DatabaseConfig, settings: WorkflowConfig) -> Result<Self> {
        let conn = if database.path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&database.path)?
        };
        info!(path = %database.path.display(), "opened zone database");
        Self::from_connection(conn, settings)
    }

    /// An ephemeral in-memory store.
    pub fn in_memory(settings: WorkflowConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, settings)
    }

    fn from_connection(conn: Connection, settings: WorkflowConfig) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                settings,
            }),
        })
    }

    /// Workflow settings this store was opened with.
    pub fn settings(&self) -> &WorkflowConfig {
        &self.inner.settings
    }

    /// Run `f` inside one transaction, committing only if it returns `Ok`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tx<'_>) -> Result<T>,
    {
        let timer = Timer::start();
        let mut conn = self.inner.conn.lock();
        let tx = Tx {
            conn: conn.transaction()?,
            settings: &self.inner.settings,
        };

        match f(&tx) {
            Ok(value) => {
                tx.conn.commit()?;
                metrics::record_transaction(true, timer.elapsed());
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "rolling back transaction");
                metrics::record_transaction(false, timer.elapsed());
                Err(e)
            }
        }
    }
}

/// One open transaction on the zone database.
pub struct Tx<'a> {
    conn: rusqlite::Transaction<'a>,
    settings: &'a WorkflowConfig,
}

impl std::fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx").finish_non_exhaustive()
    }
}

impl<'a> Tx<'a> {
    /// Workflow settings in effect for this transaction.
    pub fn settings(&self) -> &WorkflowConfig {
        self.settings
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn query_domains(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Domain>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, parse_domain_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, parse_record_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_ids<T: rusqlite::types::FromSql>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- Users, services, authorisations ---

    /// Insert a user.
    pub fn insert_user(&self, username: &str, email: &str, is_superuser: bool) -> Result<User> {
        self.conn.execute(
            "INSERT INTO users (username, email, is_superuser) VALUES (?1, ?2, ?3)",
            params![username, email, is_superuser],
        )?;
        Ok(User {
            id: UserId(self.conn.last_insert_rowid()),
            username: username.to_string(),
            email: email.to_string(),
            is_superuser,
        })
    }

    /// Fetch a user by id.
    pub fn user(&self, id: UserId) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, username, email, is_superuser FROM users WHERE id = ?1",
                params![id],
                parse_user_row,
            )
            .optional()?
            .ok_or(DnsaasError::NotFound {
                kind: "user",
                id: id.0,
            })
    }

    /// Fetch a user by username.
    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, username, email, is_superuser FROM users WHERE username = ?1",
                params![username],
                parse_user_row,
            )
            .optional()?)
    }

    /// Insert a service.
    pub fn insert_service(&self, name: &str, uid: &str) -> Result<Service> {
        self.conn.execute(
            "INSERT INTO services (name, uid, is_active) VALUES (?1, ?2, 1)",
            params![name, uid],
        )?;
        Ok(Service {
            id: ServiceId(self.conn.last_insert_rowid()),
            name: name.to_string(),
            uid: uid.to_string(),
            is_active: true,
        })
    }

    /// Register `owner` as an owner of `service`.
    pub fn add_service_owner(
        &self,
        service: ServiceId,
        owner: UserId,
        ownership_type: OwnershipType,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO service_owners (service_id, owner_id, ownership_type) \
             VALUES (?1, ?2, ?3)",
            params![service, owner, ownership_type],
        )?;
        Ok(())
    }

    /// Remove every owner of `service`.
    pub fn clear_service_owners(&self, service: ServiceId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM service_owners WHERE service_id = ?1",
            params![service],
        )?;
        Ok(())
    }

    /// Users owning `service`, directly or through either ownership type.
    pub fn service_owner_ids(&self, service: ServiceId) -> Result<Vec<UserId>> {
        self.query_ids(
            "SELECT DISTINCT owner_id FROM service_owners WHERE service_id = ?1",
            params![service],
        )
    }

    /// Insert an authorisation grant.
    pub fn insert_authorisation(
        &self,
        owner: UserId,
        authorised: UserId,
        target: EntityRef,
    ) -> Result<Authorisation> {
        self.conn.execute(
            "INSERT INTO authorisations (owner_id, authorised_id, target_kind, target_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![owner, authorised, target.kind(), target.raw_id()],
        )?;
        Ok(Authorisation {
            id: AuthorisationId(self.conn.last_insert_rowid()),
            owner,
            authorised,
            target,
        })
    }

    /// Users holding an authorisation on `target`.
    pub fn authorised_user_ids(&self, target: EntityRef) -> Result<Vec<UserId>> {
        self.query_ids(
            "SELECT DISTINCT authorised_id FROM authorisations \
             WHERE target_kind = ?1 AND target_id = ?2",
            params![target.kind(), target.raw_id()],
        )
    }

    pub(crate) fn delete_authorisations(&self, target: EntityRef) -> Result<()> {
        self.conn.execute(
            "DELETE FROM authorisations WHERE target_kind = ?1 AND target_id = ?2",
            params![target.kind(), target.raw_id()],
        )?;
        Ok(())
    }

    // --- Domains ---

    /// Fetch a domain by id.
    pub fn domain(&self, id: DomainId) -> Result<Domain> {
        self.find_domain(id)?.ok_or(DnsaasError::NotFound {
            kind: "domain",
            id: id.0,
        })
    }

    /// Fetch a domain by id, if it exists.
    pub fn find_domain(&self, id: DomainId) -> Result<Option<Domain>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = ?1"),
                params![id],
                parse_domain_row,
            )
            .optional()?)
    }

    /// Fetch a domain by its (lower-case) name.
    pub fn find_domain_by_name(&self, name: &str) -> Result<Option<Domain>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {DOMAIN_COLUMNS} FROM domains WHERE name = ?1"),
                params![name.to_ascii_lowercase()],
                parse_domain_row,
            )
            .optional()?)
    }

    /// The managed domain with the longest name that `hostname` ends in,
    /// including `hostname` itself.
    pub fn find_domain_for_hostname(&self, hostname: &str) -> Result<Option<Domain>> {
        let hostname = hostname.to_ascii_lowercase();
        let labels: Vec<&str> = hostname.split('.').collect();
        for start in 0..labels.len() {
            let candidate = labels[start..].join(".");
            if let Some(domain) = self.find_domain_by_name(&candidate)? {
                return Ok(Some(domain));
            }
        }
        Ok(None)
    }

    /// All domains, ordered by name.
    pub fn domains(&self) -> Result<Vec<Domain>> {
        self.query_domains(
            &format!("SELECT {DOMAIN_COLUMNS} FROM domains ORDER BY name"),
            [],
        )
    }

    /// Domains bound to the given template.
    pub fn domains_with_template(&self, template: DomainTemplateId) -> Result<Vec<Domain>> {
        self.query_domains(
            &format!("SELECT {DOMAIN_COLUMNS} FROM domains WHERE template_id = ?1 ORDER BY id"),
            params![template],
        )
    }

    pub(crate) fn insert_domain_row(&self, data: &DomainData) -> Result<DomainId> {
        self.conn.execute(
            "INSERT INTO domains (name, type, master, account, remarks, template_id, \
             reverse_template_id, auto_ptr, unrestricted, owner_id, service_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                data.name,
                data.domain_type,
                data.master,
                data.account,
                data.remarks,
                data.template,
                data.reverse_template,
                data.auto_ptr,
                data.unrestricted,
                data.owner,
                data.service,
            ],
        )?;
        Ok(DomainId(self.conn.last_insert_rowid()))
    }

    pub(crate) fn update_domain_row(&self, domain: &Domain) -> Result<()> {
        let data = &domain.data;
        self.conn.execute(
            "UPDATE domains SET name = ?2, type = ?3, master = ?4, account = ?5, remarks = ?6, \
             template_id = ?7, reverse_template_id = ?8, auto_ptr = ?9, unrestricted = ?10, \
             owner_id = ?11, service_id = ?12 WHERE id = ?1",
            params![
                domain.id,
                data.name,
                data.domain_type,
                data.master,
                data.account,
                data.remarks,
                data.template,
                data.reverse_template,
                data.auto_ptr,
                data.unrestricted,
                data.owner,
                data.service,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn delete_domain_row(&self, id: DomainId) -> Result<()> {
        self.conn
            .execute("DELETE FROM domains WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub(crate) fn detach_domain_template(&self, template: DomainTemplateId) -> Result<()> {
        self.conn.execute(
            "UPDATE domains SET template_id = NULL WHERE template_id = ?1",
            params![template],
        )?;
        self.conn.execute(
            "UPDATE domains SET reverse_template_id = NULL WHERE reverse_template_id = ?1",
            params![template],
        )?;
        Ok(())
    }

    // --- Records ---

    /// Fetch a record by id.
    pub fn record(&self, id: RecordId) -> Result<Record> {
        self.find_record_by_id(id)?.ok_or(DnsaasError::NotFound {
            kind: "record",
            id: id.0,
        })
    }

    /// Fetch a record by id, if it exists.
    pub fn find_record_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id],
                parse_record_row,
            )
            .optional()?)
    }

    /// Fetch the record with the given `(name, type, content)` key.
    pub fn find_record(
        &self,
        name: &str,
        record_type: RecordType,
        content: &str,
    ) -> Result<Option<Record>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records \
                     WHERE name = ?1 AND type = ?2 AND content = ?3"
                ),
                params![name, record_type, content],
                parse_record_row,
            )
            .optional()?)
    }

    /// Records sharing `name`, of any type.
    pub fn records_named(&self, name: &str) -> Result<Vec<Record>> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE name = ?1 ORDER BY id"),
            params![name],
        )
    }

    /// Records of a domain, ordered like the PowerDNS admin lists them.
    pub fn records_in_domain(&self, domain: DomainId) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE domain_id = ?1 ORDER BY name, type, id"
            ),
            params![domain],
        )
    }

    /// A and AAAA records of a domain.
    pub fn address_records_in_domain(&self, domain: DomainId) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE domain_id = ?1 AND type IN ('A', 'AAAA') ORDER BY id"
            ),
            params![domain],
        )
    }

    /// Records machine-maintained for `source`.
    pub fn dependents_of(&self, source: RecordId) -> Result<Vec<Record>> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE depends_on_id = ?1 ORDER BY id"),
            params![source],
        )
    }

    /// Records generated from a record template.
    pub fn records_of_template(&self, template: RecordTemplateId) -> Result<Vec<Record>> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE template_id = ?1 ORDER BY id"),
            params![template],
        )
    }

    /// Templated records of `domain` whose template is not a child of
    /// `template`.
    pub fn foreign_templated_records(
        &self,
        domain: DomainId,
        template: DomainTemplateId,
    ) -> Result<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE domain_id = ?1 AND template_id IS NOT NULL \
                 AND template_id NOT IN \
                 (SELECT id FROM record_templates WHERE domain_template_id = ?2) \
                 ORDER BY id"
            ),
            params![domain, template],
        )
    }

    /// Record templates already instantiated under `domain`.
    pub fn instantiated_templates(&self, domain: DomainId) -> Result<Vec<RecordTemplateId>> {
        self.query_ids(
            "SELECT DISTINCT template_id FROM records \
             WHERE domain_id = ?1 AND template_id IS NOT NULL",
            params![domain],
        )
    }

    pub(crate) fn insert_record_row(&self, data: &RecordData) -> Result<RecordId> {
        self.conn.execute(
            "INSERT INTO records (domain_id, name, type, content, ttl, prio, auth, disabled, \
             remarks, ordername, change_date, owner_id, service_id, depends_on_id, template_id, \
             auto_ptr) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                data.domain,
                data.name,
                data.record_type,
                data.content,
                data.ttl,
                data.prio,
                data.auth,
                data.disabled,
                data.remarks,
                data.ordername,
                data.change_date,
                data.owner,
                data.service,
                data.depends_on,
                data.template,
                data.auto_ptr,
            ],
        )?;
        Ok(RecordId(self.conn.last_insert_rowid()))
    }

    pub(crate) fn update_record_row(&self, record: &Record) -> Result<()> {
        let data = &record.data;
        self.conn.execute(
            "UPDATE records SET domain_id = ?2, name = ?3, type = ?4, content = ?5, ttl = ?6, \
             prio = ?7, auth = ?8, disabled = ?9, remarks = ?10, ordername = ?11, \
             change_date = ?12, owner_id = ?13, service_id = ?14, depends_on_id = ?15, \
             template_id = ?16, auto_ptr = ?17 WHERE id = ?1",
            params![
                record.id,
                data.domain,
                data.name,
                data.record_type,
                data.content,
                data.ttl,
                data.prio,
                data.auth,
                data.disabled,
                data.remarks,
                data.ordername,
                data.change_date,
                data.owner,
                data.service,
                data.depends_on,
                data.template,
                data.auto_ptr,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn delete_record_row(&self, id: RecordId) -> Result<()> {
        self.conn
            .execute("DELETE FROM records WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Advance the change date of the domain's SOA record so that serial
    /// computation observes a change even when only deletions happened.
    pub(crate) fn touch_soa(&self, domain: DomainId) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE records SET change_date = MAX(COALESCE(change_date, 0) + 1, ?2) \
             WHERE domain_id = ?1 AND type = 'SOA'",
            params![domain, unix_now()],
        )?;
        Ok(changed > 0)
    }

    // --- Templates ---

    /// Fetch a domain template by id.
    pub fn domain_template(&self, id: DomainTemplateId) -> Result<DomainTemplate> {
        self.conn
            .query_row(
                &format!("SELECT {DOMAIN_TEMPLATE_COLUMNS} FROM domain_templates WHERE id = ?1"),
                params![id],
                parse_domain_template_row,
            )
            .optional()?
            .ok_or(DnsaasError::NotFound {
                kind: "domain template",
                id: id.0,
            })
    }

    /// Fetch a domain template by name.
    pub fn find_domain_template(&self, name: &str) -> Result<Option<DomainTemplate>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {DOMAIN_TEMPLATE_COLUMNS} FROM domain_templates WHERE name = ?1"),
                params![name],
                parse_domain_template_row,
            )
            .optional()?)
    }

    pub(crate) fn insert_domain_template_row(
        &self,
        data: &DomainTemplateData,
    ) -> Result<DomainTemplateId> {
        self.conn.execute(
            "INSERT INTO domain_templates (name, type, unrestricted, is_public_domain, auto_ptr) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                data.name,
                data.domain_type,
                data.unrestricted,
                data.is_public_domain,
                data.auto_ptr,
            ],
        )?;
        Ok(DomainTemplateId(self.conn.last_insert_rowid()))
    }

    pub(crate) fn update_domain_template_row(&self, template: &DomainTemplate) -> Result<()> {
        let data = &template.data;
        self.conn.execute(
            "UPDATE domain_templates SET name = ?2, type = ?3, unrestricted = ?4, \
             is_public_domain = ?5, auto_ptr = ?6 WHERE id = ?1",
            params![
                template.id,
                data.name,
                data.domain_type,
                data.unrestricted,
                data.is_public_domain,
                data.auto_ptr,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn delete_domain_template_row(&self, id: DomainTemplateId) -> Result<()> {
        self.conn
            .execute("DELETE FROM domain_templates WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Fetch a record template by id.
    pub fn record_template(&self, id: RecordTemplateId) -> Result<RecordTemplate> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_TEMPLATE_COLUMNS} FROM record_templates WHERE id = ?1"),
                params![id],
                parse_record_template_row,
            )
            .optional()?
            .ok_or(DnsaasError::NotFound {
                kind: "record template",
                id: id.0,
            })
    }

    /// Children of a domain template.
    pub fn record_templates_of(&self, template: DomainTemplateId) -> Result<Vec<RecordTemplate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_TEMPLATE_COLUMNS} FROM record_templates \
             WHERE domain_template_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![template], parse_record_template_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn insert_record_template_row(
        &self,
        data: &RecordTemplateData,
    ) -> Result<RecordTemplateId> {
        self.conn.execute(
            "INSERT INTO record_templates (domain_template_id, type, name, content, ttl, prio, \
             auth, remarks) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                data.domain_template,
                data.record_type,
                data.name,
                data.content,
                data.ttl,
                data.prio,
                data.auth,
                data.remarks,
            ],
        )?;
        Ok(RecordTemplateId(self.conn.last_insert_rowid()))
    }

    pub(crate) fn update_record_template_row(&self, template: &RecordTemplate) -> Result<()> {
        let data = &template.data;
        self.conn.execute(
            "UPDATE record_templates SET domain_template_id = ?2, type = ?3, name = ?4, \
             content = ?5, ttl = ?6, prio = ?7, auth = ?8, remarks = ?9 WHERE id = ?1",
            params![
                template.id,
                data.domain_template,
                data.record_type,
                data.name,
                data.content,
                data.ttl,
                data.prio,
                data.auth,
                data.remarks,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn delete_record_template_row(&self, id: RecordTemplateId) -> Result<()> {
        self.conn
            .execute("DELETE FROM record_templates WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::in_memory(WorkflowConfig::default()).unwrap()
    }

    #[test]
    fn test_schema_is_idempotent() {
        let store = store();
        store
            .transaction(|tx| {
                tx.conn().execute_batch(SCHEMA)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_rollback_on_error() {
        let store = store();
        let result: Result<()> = store.transaction(|tx| {
            tx.insert_user("alice", "alice@example.com", false)?;
            Err(DnsaasError::Validation("boom".into()))
        });
        assert!(result.is_err());

        let found = store.transaction(|tx| tx.find_user("alice")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_record_row_round_trip() {
        let store = store();
        store
            .transaction(|tx| {
                let domain = tx.insert_domain_row(&DomainData::new("example.com"))?;
                let mut data = RecordData::new(domain, "www.example.com", RecordType::A, "10.0.0.1");
                data.prio = Some(5);
                let id = tx.insert_record_row(&data)?;

                let record = tx.record(id)?;
                assert_eq!(record.data, data);
                assert!(tx
                    .find_record("www.example.com", RecordType::A, "10.0.0.1")?
                    .is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_find_domain_for_hostname_prefers_longest_suffix() {
        let store = store();
        store
            .transaction(|tx| {
                tx.insert_domain_row(&DomainData::new("example.com"))?;
                let sub = tx.insert_domain_row(&DomainData::new("sub.example.com"))?;

                let found = tx.find_domain_for_hostname("www.sub.example.com")?.unwrap();
                assert_eq!(found.id, sub);
                assert!(tx.find_domain_for_hostname("example.org")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_touch_soa_advances_change_date() {
        let store = store();
        store
            .transaction(|tx| {
                let domain = tx.insert_domain_row(&DomainData::new("example.com"))?;
                let mut soa = RecordData::new(
                    domain,
                    "example.com",
                    RecordType::Soa,
                    "ns1.example.com. hostmaster.example.com. 0 43200 600 1209600 600",
                );
                soa.change_date = Some(i64::MAX - 10);
                let id = tx.insert_record_row(&soa)?;

                assert!(tx.touch_soa(domain)?);
                assert_eq!(tx.record(id)?.data.change_date, Some(i64::MAX - 9));
                Ok(())
            })
            .unwrap();
    }
}
