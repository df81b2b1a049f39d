//! SQLite-backed fabric store: a `rusqlite::Connection` behind a mutex,
//! schema applied via `execute_batch` migrations, durable writes before
//! return (see DESIGN.md for why `rusqlite` rather than `libsql`).

use super::types::{
    Discovery, Entanglement, EntanglementStatus, FileClaim, PhaseState, Pulse, Snapshot,
};
use crate::errors::FabricError;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::sync::Mutex;

type Result<T> = std::result::Result<T, FabricError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS phase_states (
    phase_id TEXT PRIMARY KEY,
    state TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS entanglements (
    producer TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    package TEXT NOT NULL,
    signature TEXT NOT NULL,
    status TEXT NOT NULL,
    PRIMARY KEY (kind, name, package)
);
CREATE TABLE IF NOT EXISTS file_claims (
    path TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS discoveries (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL,
    affects TEXT,
    resolved INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS pulses (
    task_id TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL,
    created_at TEXT NOT NULL,
    seq INTEGER PRIMARY KEY AUTOINCREMENT
);
";

/// The persistent coordination substrate. Cheaply `Clone`-able handles are
/// not provided; wrap in `Arc<FabricStore>` at the call site the way the
/// teacher wraps `FactoryDb`.
pub struct FabricStore {
    conn: Mutex<Connection>,
}

impl FabricStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(FabricError::Storage)?;
        conn.execute_batch(SCHEMA).map_err(FabricError::Storage)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(FabricError::Storage)?;
        conn.execute_batch(SCHEMA).map_err(FabricError::Storage)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn set_phase_state(&self, id: &str, state: PhaseState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO phase_states (phase_id, state) VALUES (?1, ?2)
             ON CONFLICT(phase_id) DO UPDATE SET state = excluded.state",
            params![id, state.to_string()],
        )
        .map_err(FabricError::Storage)?;
        Ok(())
    }

    pub fn get_phase_state(&self, id: &str) -> Result<Option<PhaseState>> {
        let conn = self.conn.lock().unwrap();
        let state: Option<String> = conn
            .query_row("SELECT state FROM phase_states WHERE phase_id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(FabricError::Storage)?;
        Ok(state.and_then(|s| parse_state(&s)))
    }

    pub fn all_phase_states(&self) -> Result<BTreeMap<String, PhaseState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT phase_id, state FROM phase_states")
            .map_err(FabricError::Storage)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(FabricError::Storage)?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (id, state) = row.map_err(FabricError::Storage)?;
            if let Some(s) = parse_state(&state) {
                out.insert(id, s);
            }
        }
        Ok(out)
    }

    /// Idempotent on identity `(kind, name, package)`.
    pub fn publish(&self, e: &Entanglement) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entanglements (producer, kind, name, package, signature, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(kind, name, package) DO UPDATE SET
                producer = excluded.producer,
                signature = excluded.signature,
                status = excluded.status",
            params![
                e.producer,
                kind_str(e.kind),
                e.name,
                e.package,
                e.signature,
                status_str(e.status),
            ],
        )
        .map_err(FabricError::Storage)?;
        Ok(())
    }

    pub fn all_entanglements(&self) -> Result<Vec<Entanglement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT producer, kind, name, package, signature, status FROM entanglements")
            .map_err(FabricError::Storage)?;
        let rows = stmt
            .query_map([], row_to_entanglement)
            .map_err(FabricError::Storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)
    }

    /// There is no stored `consumer` attribute on an entanglement (only
    /// producer/kind/name/package are persisted); consumer-specific
    /// filtering happens in the poller against its own registered contract,
    /// so this returns every published entanglement.
    pub fn entanglements_for(&self, _consumer: &str) -> Result<Vec<Entanglement>> {
        self.all_entanglements()
    }

    /// Atomic claim: never blocks. Returns `(true, None)` on success or
    /// `(false, Some(current_owner))` on contention.
    pub fn claim(&self, path: &str, owner: &str) -> Result<(bool, Option<String>)> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<String> = conn
            .query_row("SELECT owner FROM file_claims WHERE path = ?1", params![path], |r| r.get(0))
            .optional()
            .map_err(FabricError::Storage)?;
        if let Some(current) = existing {
            if current == owner {
                return Ok((true, None));
            }
            return Ok((false, Some(current)));
        }
        conn.execute(
            "INSERT INTO file_claims (path, owner, acquired_at) VALUES (?1, ?2, ?3)",
            params![path, owner, Utc::now().to_rfc3339()],
        )
        .map_err(FabricError::Storage)?;
        Ok((true, None))
    }

    pub fn release(&self, path: &str, owner: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM file_claims WHERE path = ?1 AND owner = ?2",
            params![path, owner],
        )
        .map_err(FabricError::Storage)?;
        Ok(())
    }

    pub fn release_all_for(&self, owner: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM file_claims WHERE owner = ?1", params![owner])
            .map_err(FabricError::Storage)?;
        Ok(())
    }

    pub fn all_claims(&self) -> Result<Vec<FileClaim>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT path, owner, acquired_at FROM file_claims")
            .map_err(FabricError::Storage)?;
        let rows = stmt
            .query_map([], |r| {
                let acquired_at: String = r.get(2)?;
                Ok(FileClaim {
                    path: r.get(0)?,
                    owner: r.get(1)?,
                    acquired_at: chrono::DateTime::parse_from_rfc3339(&acquired_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(FabricError::Storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)
    }

    pub fn post_discovery(&self, d: &Discovery) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO discoveries (id, source, kind, detail, affects, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET resolved = excluded.resolved",
            params![
                d.id,
                d.source,
                discovery_kind_str(d.kind),
                d.detail,
                d.affects,
                d.resolved as i64,
            ],
        )
        .map_err(FabricError::Storage)?;
        Ok(())
    }

    pub fn resolve_discovery(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE discoveries SET resolved = 1 WHERE id = ?1", params![id])
            .map_err(FabricError::Storage)?;
        Ok(())
    }

    pub fn unresolved_discoveries(&self) -> Result<Vec<Discovery>> {
        self.discoveries_where("resolved = 0")
    }

    pub fn all_discoveries(&self) -> Result<Vec<Discovery>> {
        self.discoveries_where("1=1")
    }

    fn discoveries_where(&self, predicate: &str) -> Result<Vec<Discovery>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT id, source, kind, detail, affects, resolved FROM discoveries WHERE {predicate}");
        let mut stmt = conn.prepare(&sql).map_err(FabricError::Storage)?;
        let rows = stmt
            .query_map([], row_to_discovery)
            .map_err(FabricError::Storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)
    }

    pub fn emit_pulse(&self, p: &Pulse) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pulses (task_id, content, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![p.task_id, p.content, pulse_kind_str(p.kind), p.created_at.to_rfc3339()],
        )
        .map_err(FabricError::Storage)?;
        Ok(())
    }

    /// Replayed in creation order; not age-filtered (see DESIGN.md).
    pub fn pulses_for(&self, task_id: &str) -> Result<Vec<Pulse>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT task_id, content, kind, created_at FROM pulses WHERE task_id = ?1 ORDER BY seq ASC")
            .map_err(FabricError::Storage)?;
        let rows = stmt
            .query_map(params![task_id], row_to_pulse)
            .map_err(FabricError::Storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)
    }

    /// Build a point-in-time consistent view by reading every table inside
    /// one transaction.
    pub fn build_snapshot(&self) -> Result<Snapshot> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction().map_err(FabricError::Storage)?;

        let entanglements = {
            let mut stmt = tx
                .prepare("SELECT producer, kind, name, package, signature, status FROM entanglements")
                .map_err(FabricError::Storage)?;
            let rows = stmt.query_map([], row_to_entanglement).map_err(FabricError::Storage)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)?
        };

        let file_claims = {
            let mut stmt = tx.prepare("SELECT path, owner FROM file_claims").map_err(FabricError::Storage)?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
                .map_err(FabricError::Storage)?;
            rows.collect::<rusqlite::Result<BTreeMap<_, _>>>().map_err(FabricError::Storage)?
        };

        let states = {
            let mut stmt = tx.prepare("SELECT phase_id, state FROM phase_states").map_err(FabricError::Storage)?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
                .map_err(FabricError::Storage)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)?
        };
        let completed = states
            .iter()
            .filter(|(_, s)| parse_state(s) == Some(PhaseState::Done))
            .map(|(id, _)| id.clone())
            .collect();
        let in_progress = states
            .iter()
            .filter(|(_, s)| parse_state(s) == Some(PhaseState::Running))
            .map(|(id, _)| id.clone())
            .collect();

        let unresolved_discoveries = {
            let mut stmt = tx
                .prepare("SELECT id, source, kind, detail, affects, resolved FROM discoveries WHERE resolved = 0")
                .map_err(FabricError::Storage)?;
            let rows = stmt.query_map([], row_to_discovery).map_err(FabricError::Storage)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)?
        };

        let pulses = {
            let mut stmt = tx
                .prepare("SELECT task_id, content, kind, created_at FROM pulses ORDER BY seq ASC")
                .map_err(FabricError::Storage)?;
            let rows = stmt.query_map([], row_to_pulse).map_err(FabricError::Storage)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(FabricError::Storage)?
        };

        tx.commit().map_err(FabricError::Storage)?;

        Ok(Snapshot {
            entanglements,
            file_claims,
            completed,
            in_progress,
            unresolved_discoveries,
            pulses,
        })
    }
}

fn kind_str(kind: super::types::EntanglementKind) -> &'static str {
    use super::types::EntanglementKind::*;
    match kind {
        Type => "type",
        Function => "function",
        Interface => "interface",
        Constant => "constant",
        Package => "package",
        Other => "other",
    }
}

fn parse_kind(s: &str) -> super::types::EntanglementKind {
    use super::types::EntanglementKind::*;
    match s {
        "type" => Type,
        "function" => Function,
        "interface" => Interface,
        "constant" => Constant,
        "package" => Package,
        _ => Other,
    }
}

fn status_str(status: EntanglementStatus) -> &'static str {
    match status {
        EntanglementStatus::Pending => "pending",
        EntanglementStatus::Fulfilled => "fulfilled",
    }
}

fn parse_state(s: &str) -> Option<PhaseState> {
    Some(match s {
        "pending" => PhaseState::Pending,
        "scanning" => PhaseState::Scanning,
        "running" => PhaseState::Running,
        "done" => PhaseState::Done,
        "failed" => PhaseState::Failed,
        "blocked" => PhaseState::Blocked,
        "decomposed" => PhaseState::Decomposed,
        "human_decision" => PhaseState::HumanDecision,
        _ => return None,
    })
}

fn discovery_kind_str(kind: super::types::DiscoveryKind) -> &'static str {
    use super::types::DiscoveryKind::*;
    match kind {
        EntanglementDispute => "entanglement_dispute",
        MissingDependency => "missing_dependency",
        FileConflict => "file_conflict",
        RequirementsAmbiguity => "requirements_ambiguity",
        BudgetAlert => "budget_alert",
        CriticalFinding => "critical_finding",
        RiskEscalation => "risk_escalation",
        HumanReviewRequested => "human_review_requested",
        CycleLimitReached => "cycle_limit_reached",
    }
}

fn parse_discovery_kind(s: &str) -> super::types::DiscoveryKind {
    use super::types::DiscoveryKind::*;
    match s {
        "missing_dependency" => MissingDependency,
        "file_conflict" => FileConflict,
        "requirements_ambiguity" => RequirementsAmbiguity,
        "budget_alert" => BudgetAlert,
        "critical_finding" => CriticalFinding,
        "risk_escalation" => RiskEscalation,
        "human_review_requested" => HumanReviewRequested,
        "cycle_limit_reached" => CycleLimitReached,
        _ => EntanglementDispute,
    }
}

fn pulse_kind_str(kind: super::types::PulseKind) -> &'static str {
    use super::types::PulseKind::*;
    match kind {
        Note => "note",
        Decision => "decision",
        Failure => "failure",
        ReviewerFeedback => "reviewer_feedback",
    }
}

fn parse_pulse_kind(s: &str) -> super::types::PulseKind {
    use super::types::PulseKind::*;
    match s {
        "decision" => Decision,
        "failure" => Failure,
        "reviewer_feedback" => ReviewerFeedback,
        _ => Note,
    }
}

fn row_to_entanglement(r: &rusqlite::Row) -> rusqlite::Result<Entanglement> {
    let status: String = r.get(5)?;
    Ok(Entanglement {
        producer: r.get(0)?,
        kind: parse_kind(&r.get::<_, String>(1)?),
        name: r.get(2)?,
        package: r.get(3)?,
        signature: r.get(4)?,
        status: if status == "fulfilled" {
            EntanglementStatus::Fulfilled
        } else {
            EntanglementStatus::Pending
        },
    })
}

fn row_to_discovery(r: &rusqlite::Row) -> rusqlite::Result<Discovery> {
    Ok(Discovery {
        id: r.get(0)?,
        source: r.get(1)?,
        kind: parse_discovery_kind(&r.get::<_, String>(2)?),
        detail: r.get(3)?,
        affects: r.get(4)?,
        resolved: r.get::<_, i64>(5)? != 0,
    })
}

fn row_to_pulse(r: &rusqlite::Row) -> rusqlite::Result<Pulse> {
    let created_at: String = r.get(3)?;
    Ok(Pulse {
        task_id: r.get(0)?,
        content: r.get(1)?,
        kind: parse_pulse_kind(&r.get::<_, String>(2)?),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
