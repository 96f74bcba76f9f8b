//! Unit run ledger.
//!
//! A row means "this unit is done with this entity". The scheduler loads the
//! ledger at start, so a second run over an unchanged graph finds nothing to
//! do and applies no aggregation twice.

use rusqlite::params;
use tracing::trace;

use super::helpers::{row_to_unit_run, RUN_COLUMNS};
use super::SqliteGraphStore;
use crate::error::Result;
use crate::types::UnitRun;

impl SqliteGraphStore {
    pub(super) fn insert_unit_runs(&self, runs: &[UnitRun]) -> Result<usize> {
        if runs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO unit_runs (unit, node_id, outcome, pass, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(unit, node_id) DO UPDATE SET
                    outcome = excluded.outcome,
                    pass = excluded.pass,
                    message = excluded.message",
            )?;
            for run in runs {
                insert.execute(params![
                    run.unit,
                    run.node_id,
                    run.outcome.as_str(),
                    run.pass,
                    run.message
                ])?;
            }
        }
        tx.commit()?;

        trace!(count = runs.len(), "Recorded unit runs");
        Ok(runs.len())
    }

    pub(super) fn unit_runs(&self) -> Result<Vec<UnitRun>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM unit_runs ORDER BY unit, node_id"
        ))?;
        let runs = stmt
            .query_map([], row_to_unit_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    pub(super) fn delete_unit_runs(&self) -> Result<()> {
        let conn = self.connection()?;
        let deleted = conn.execute("DELETE FROM unit_runs", [])?;
        trace!(deleted, "Reset unit run ledger");
        Ok(())
    }
}
