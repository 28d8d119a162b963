//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `strata_core` linkage.
//! - Run one insert, update, soft delete and hard delete cycle per dialect on
//!   an in-memory session and print the observed tokens.

use log::info;
use rusqlite::types::Value;
use rusqlite::Row;
use strata_core::{
    AuditTrail, Auditable, ColumnDef, Dialect, EntityService, FixedIdentity, Identifiable,
    Identity, LogSettings, RecordHeader, Repository, TableMapping, UnitOfWork, VersionControlled,
    Versioning,
};

const LOG_DIR_VAR: &str = "STRATA_LOG_DIR";

struct Sample {
    identity: Identity,
    audit: AuditTrail,
    versioning: Versioning,
    label: String,
}

impl Sample {
    fn new(label: &str) -> Self {
        Self {
            identity: Identity::new(),
            audit: AuditTrail::new(),
            versioning: Versioning::new(),
            label: label.to_string(),
        }
    }
}

impl Identifiable for Sample {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }
}

impl Auditable for Sample {
    fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditTrail {
        &mut self.audit
    }
}

impl VersionControlled for Sample {
    fn versioning(&self) -> &Versioning {
        &self.versioning
    }

    fn versioning_mut(&mut self) -> &mut Versioning {
        &mut self.versioning
    }
}

impl TableMapping for Sample {
    const TABLE: &'static str = "samples";
    const ENTITY_TYPE: &'static str = "Sample";

    fn columns() -> &'static [ColumnDef] {
        const COLUMNS: &[ColumnDef] = &[ColumnDef::new("label", "TEXT NOT NULL")];
        COLUMNS
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.label.clone())]
    }

    fn from_row(row: &Row<'_>, header: RecordHeader) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: header.identity,
            audit: header.audit,
            versioning: header.versioning,
            label: row.get("label")?,
        })
    }
}

fn token_text(sample: &Sample) -> String {
    sample
        .concurrency_token()
        .map_or_else(|| "-".to_string(), ToString::to_string)
}

fn run_cycle(dialect: Dialect) -> Result<(), Box<dyn std::error::Error>> {
    let conn = strata_core::open_session_in_memory()?;
    strata_core::ensure_table::<Sample>(&conn, dialect)?;
    let mut service = EntityService::new(
        Repository::<Sample>::new(),
        UnitOfWork::new(conn, dialect),
        FixedIdentity::new("strata_cli"),
    );

    let mut sample = Sample::new("first");
    service.insert_one(&mut sample)?;
    let inserted = token_text(&sample);

    sample.label = "second".to_string();
    service.update_one(&mut sample)?;
    let updated = token_text(&sample);

    service.delete_soft_one(&mut sample)?;
    let soft_deleted = token_text(&sample);
    let id = sample.id().ok_or("insert did not assign an id")?;
    let hidden = service.get_by_id(id, false)?.is_none();

    service.delete_hard_one(&sample)?;
    let gone = service.get_by_id(id, true)?.is_none();

    println!(
        "dialect={dialect} id={id} insert_token={inserted} update_token={updated} soft_delete_token={soft_deleted} hidden_after_soft_delete={hidden} gone_after_hard_delete={gone}"
    );
    info!("event=cli_cycle module=cli status=ok dialect={dialect}");
    Ok(())
}

fn main() {
    if let Ok(directory) = std::env::var(LOG_DIR_VAR) {
        let settings = LogSettings::new(strata_core::default_log_level(), directory);
        if let Err(err) = strata_core::init_logging(&settings) {
            eprintln!("logging disabled: {err}");
        }
    }

    println!("strata_core version={}", strata_core::core_version());
    let mut failed = false;
    for dialect in Dialect::ALL {
        if let Err(err) = run_cycle(dialect) {
            eprintln!("dialect={dialect} cycle failed: {err}");
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}
