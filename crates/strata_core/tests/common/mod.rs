#![allow(dead_code)]

use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::sync::Arc;
use strata_core::{
    ensure_table, open_session_in_memory, AuditTrail, Auditable, Capabilities, ColumnDef, Dialect,
    EntityService, FixedClock, FixedIdentity, Identifiable, Identity, RecordHeader, RepoResult,
    Repository, TableMapping, UnitOfWork, VersionControlled, Versioning,
};

pub const NOW: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub identity: Identity,
    pub audit: AuditTrail,
    pub versioning: Versioning,
    pub name: String,
    pub city: Option<String>,
    pub tier: i64,
    pub addresses: Vec<String>,
}

impl Customer {
    pub fn new(name: &str) -> Self {
        Self {
            identity: Identity::new(),
            audit: AuditTrail::new(),
            versioning: Versioning::new(),
            name: name.to_string(),
            city: None,
            tier: 0,
            addresses: Vec::new(),
        }
    }

    pub fn in_city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    pub fn with_tier(mut self, tier: i64) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.audit.capabilities = capabilities;
        self
    }
}

impl Identifiable for Customer {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }
}

impl Auditable for Customer {
    fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditTrail {
        &mut self.audit
    }
}

impl VersionControlled for Customer {
    fn versioning(&self) -> &Versioning {
        &self.versioning
    }

    fn versioning_mut(&mut self) -> &mut Versioning {
        &mut self.versioning
    }
}

impl TableMapping for Customer {
    const TABLE: &'static str = "customers";
    const ENTITY_TYPE: &'static str = "Customer";

    fn columns() -> &'static [ColumnDef] {
        const COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("name", "TEXT NOT NULL"),
            ColumnDef::new("city", "TEXT"),
            ColumnDef::new("tier", "INTEGER NOT NULL CHECK (tier >= 0)"),
        ];
        COLUMNS
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            self.city.clone().map_or(Value::Null, Value::Text),
            Value::Integer(self.tier),
        ]
    }

    fn from_row(row: &Row<'_>, header: RecordHeader) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: header.identity,
            audit: header.audit,
            versioning: header.versioning,
            name: row.get("name")?,
            city: row.get("city")?,
            tier: row.get("tier")?,
            addresses: Vec::new(),
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        Ok(())
    }

    fn relations() -> &'static [&'static str] {
        &["addresses"]
    }

    fn load_relation(
        &mut self,
        conn: &Connection,
        _dialect: Dialect,
        _relation: &str,
    ) -> RepoResult<()> {
        let mut stmt = conn.prepare(
            "SELECT line FROM customer_addresses WHERE customer_id = ?1 ORDER BY line ASC;",
        )?;
        let lines = stmt
            .query_map(params![self.identity.id()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        self.addresses = lines;
        Ok(())
    }
}

pub fn session(dialect: Dialect) -> Connection {
    let conn = open_session_in_memory().expect("in-memory session should open");
    ensure_table::<Customer>(&conn, dialect).expect("customers table should be created");
    conn.execute_batch(
        "CREATE TABLE customer_addresses (
            customer_id INTEGER NOT NULL,
            line TEXT NOT NULL
        );",
    )
    .expect("address table should be created");
    conn
}

pub fn unit_of_work(dialect: Dialect) -> UnitOfWork {
    UnitOfWork::new(session(dialect), dialect)
}

pub fn repository() -> Repository<Customer> {
    Repository::with_clock(Arc::new(FixedClock(NOW)))
}

pub fn service(dialect: Dialect) -> EntityService<Customer, FixedIdentity> {
    service_as(dialect, FixedIdentity::new("alice"))
}

pub fn service_as(dialect: Dialect, identity: FixedIdentity) -> EntityService<Customer, FixedIdentity> {
    EntityService::new(repository(), unit_of_work(dialect), identity)
}

/// Inserts `count` customers named `customer-00`, `customer-01`, ...
pub fn seed(service: &mut EntityService<Customer, FixedIdentity>, count: usize) -> Vec<Customer> {
    let mut customers: Vec<Customer> = (0..count)
        .map(|index| Customer::new(&format!("customer-{index:02}")))
        .collect();
    service
        .insert_many(&mut customers)
        .expect("seed insert should succeed");
    customers
}

pub fn stored_name(uow: &UnitOfWork, id: i64) -> Option<String> {
    uow.session()
        .expect("session should be open")
        .query_row(
            "SELECT name FROM customers WHERE id = ?1;",
            params![id],
            |row| row.get(0),
        )
        .ok()
}

pub fn row_count(uow: &UnitOfWork) -> i64 {
    uow.session()
        .expect("session should be open")
        .query_row("SELECT COUNT(*) FROM customers;", [], |row| row.get(0))
        .expect("count should succeed")
}
