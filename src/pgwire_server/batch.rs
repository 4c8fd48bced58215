//! Multi-tuple execution of one statement: tuples are routed, grouped per destination and
//! each destination's group runs in one backend round trip.

use std::collections::HashMap;

use tracing::debug;

use crate::backend::{Backend, BatchExecutionUnit, StatementContext};
use crate::error::ProxyResult;
use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Affected rows per input tuple, summed over every destination the tuple reached.
    pub per_tuple: Vec<i64>,
    /// Sum of every count returned by every destination.
    pub total: i64,
}

pub struct BatchExecutor<'a> {
    backend: &'a dyn Backend,
    ctx: &'a StatementContext,
    param_sets: Vec<Vec<Value>>,
}

/// Where a tuple landed: unit index and position inside that unit.
type Slot = (usize, usize);

impl<'a> BatchExecutor<'a> {
    pub fn new(backend: &'a dyn Backend, ctx: &'a StatementContext, param_sets: Vec<Vec<Value>>) -> Self {
        BatchExecutor { backend, ctx, param_sets }
    }

    /// Group tuples by destination, keeping first-seen destination order.
    fn build_units(&self) -> ProxyResult<(Vec<BatchExecutionUnit>, Vec<Vec<Slot>>)> {
        let mut units: Vec<BatchExecutionUnit> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut slots = Vec::with_capacity(self.param_sets.len());
        for params in &self.param_sets {
            let mut tuple_slots = Vec::new();
            for route in self.backend.route(self.ctx, params)? {
                let key = (route.destination.clone(), route.sql.clone());
                let unit_idx = *index.entry(key).or_insert_with(|| {
                    units.push(BatchExecutionUnit::new(route.destination.clone(), route.sql.clone()));
                    units.len() - 1
                });
                let unit = &mut units[unit_idx];
                tuple_slots.push((unit_idx, unit.param_sets.len()));
                unit.param_sets.push(route.params);
            }
            slots.push(tuple_slots);
        }
        Ok((units, slots))
    }

    pub fn execute(&self) -> ProxyResult<BatchOutcome> {
        if self.param_sets.is_empty() {
            return Ok(BatchOutcome { per_tuple: Vec::new(), total: 0 });
        }
        let (units, slots) = self.build_units()?;
        debug!(target: "pgwire", "batch of {} tuples over {} destinations", self.param_sets.len(), units.len());
        let mut results: Vec<Vec<i64>> = Vec::with_capacity(units.len());
        for unit in &units {
            results.push(self.backend.execute_batch(unit)?);
        }
        let total = results.iter().flatten().sum();
        let per_tuple = slots
            .iter()
            .map(|tuple_slots| {
                tuple_slots
                    .iter()
                    .map(|(u, pos)| results[*u].get(*pos).copied().unwrap_or(0))
                    .sum()
            })
            .collect();
        Ok(BatchOutcome { per_tuple, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::ProxyError;
    use crate::types::ColumnType;

    const SQL: &str = "INSERT INTO t_order (order_id, status) VALUES ($1, $2)";

    fn backend() -> MemoryBackend {
        MemoryBackend::new(vec!["ds_0".into(), "ds_1".into()]).with_update(SQL, vec![ColumnType::Int8, ColumnType::Text], 1, false).unwrap()
    }

    fn tuples(ids: &[i64]) -> Vec<Vec<Value>> { ids.iter().map(|id| vec![Value::Int8(*id), Value::from("init")]).collect() }

    #[test]
    fn groups_by_destination_and_sums() {
        let b = backend();
        let ctx = b.prepare(SQL).unwrap();
        let outcome = BatchExecutor::new(&b, &ctx, tuples(&[1, 2, 3, 4, 5])).execute().unwrap();
        assert_eq!(outcome.per_tuple, vec![1, 1, 1, 1, 1]);
        assert_eq!(outcome.total, 5);

        let batches = b.executed_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].destination, "ds_1");
        assert_eq!(batches[0].param_sets, tuples(&[1, 3, 5]));
        assert_eq!(batches[1].destination, "ds_0");
        assert_eq!(batches[1].param_sets, tuples(&[2, 4]));
    }

    #[test]
    fn broadcast_tuples_count_every_destination() {
        let b = MemoryBackend::new(vec!["ds_0".into(), "ds_1".into()]).with_update("DELETE FROM t_config WHERE k = $1", vec![], 2, true).unwrap();
        let ctx = b.prepare("DELETE FROM t_config WHERE k = $1").unwrap();
        let outcome = BatchExecutor::new(&b, &ctx, vec![vec![Value::from("a")], vec![Value::from("b")]]).execute().unwrap();
        assert_eq!(outcome.per_tuple, vec![4, 4]);
        let per_destination: i64 = b.executed_batches().iter().map(|u| u.param_sets.len() as i64 * 2).sum();
        assert_eq!(outcome.total, per_destination);
    }

    #[test]
    fn destination_failure_is_one_error() {
        let b = backend().with_failing_destination(SQL, "ds_0").unwrap();
        let ctx = b.prepare(SQL).unwrap();
        let err = BatchExecutor::new(&b, &ctx, tuples(&[1, 2])).execute().unwrap_err();
        assert!(matches!(err, ProxyError::Backend(ref e) if e.sqlstate == "08006"));
        // ds_1 ran before the failure and is not rolled back here
        assert_eq!(b.executed_batches().len(), 1);
    }

    #[test]
    fn empty_batch() {
        let b = backend();
        let ctx = b.prepare(SQL).unwrap();
        let outcome = BatchExecutor::new(&b, &ctx, vec![]).execute().unwrap();
        assert_eq!(outcome.total, 0);
        assert!(b.executed_batches().is_empty());
    }
}
