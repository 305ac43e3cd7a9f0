//! Transactional step plans.
//!
//! Cascading multi-statement mutations are expressed as an ordered list of
//! `(sql, params, expected-row-count)` steps executed inside one transaction.
//! The first mismatch or error aborts the plan and rolls back every prior
//! step: an expected-exactly-one-row delete that affects zero or several rows
//! is corruption, not a condition to continue past.

use rusqlite::types::ToSql;
use rusqlite::{params_from_iter, Connection, Transaction};

use crate::error::{Result, StoreError};

/// How many rows a step must affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedRows {
    /// Exactly this many rows, or the plan aborts.
    Exactly(usize),
    /// Any number of rows, including zero.
    Any,
}

/// One step of a transactional plan.
pub struct PlanStep {
    sql: String,
    params: Vec<Box<dyn ToSql + Send>>,
    expect: ExpectedRows,
}

/// An ordered list of row-count-checked statements.
#[derive(Default)]
pub struct TxPlan {
    steps: Vec<PlanStep>,
}

impl TxPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(
        mut self,
        sql: impl Into<String>,
        params: Vec<Box<dyn ToSql + Send>>,
        expect: ExpectedRows,
    ) -> Self {
        self.steps.push(PlanStep {
            sql: sql.into(),
            params,
            expect,
        });
        self
    }

    /// Number of steps queued.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step on an open transaction without committing.
    ///
    /// The caller owns the commit; dropping the transaction on error rolls
    /// everything back.
    pub fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        for step in &self.steps {
            let affected = tx.execute(
                &step.sql,
                params_from_iter(step.params.iter().map(|p| p.as_ref() as &dyn ToSql)),
            )?;

            if let ExpectedRows::Exactly(expected) = step.expect {
                if affected != expected {
                    return Err(StoreError::RowCountMismatch {
                        sql: step.sql.clone(),
                        expected,
                        actual: affected,
                    });
                }
            }
        }
        Ok(())
    }

    /// Execute the plan in its own transaction and commit.
    pub fn execute(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction()?;
        self.run(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

/// Box a parameter for a plan step.
pub fn param<T: ToSql + Send + 'static>(value: T) -> Box<dyn ToSql + Send> {
    Box::new(value)
}
