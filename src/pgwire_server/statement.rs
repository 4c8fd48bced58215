use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::StatementContext;
use crate::error::{ProxyError, ProxyResult};
use crate::types::ColumnType;

/// Parsed statement template. Immutable once registered; portals hold it through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub name: String,
    pub sql: String,
    pub ctx: StatementContext,
    /// Resolved parameter types; never `Unspecified`.
    pub param_types: Vec<ColumnType>,
}

impl PreparedStatement {
    /// Declared oids win, then backend inference, then TEXT.
    pub fn new(name: String, ctx: StatementContext, declared: &[i32]) -> ProxyResult<Self> {
        let count = declared.len().max(ctx.param_types.len());
        let param_types = (0..count)
            .map(|i| -> ProxyResult<ColumnType> {
                let declared = match declared.get(i).copied().unwrap_or(0) {
                    0 => ColumnType::Unspecified,
                    oid => ColumnType::from_oid(oid)?,
                };
                let inferred = ctx.param_types.get(i).copied().unwrap_or(ColumnType::Unspecified);
                Ok(match (declared, inferred) {
                    (ColumnType::Unspecified, ColumnType::Unspecified) => ColumnType::Text,
                    (ColumnType::Unspecified, t) => t,
                    (t, _) => t,
                })
            })
            .collect::<ProxyResult<Vec<_>>>()?;
        Ok(PreparedStatement { name, sql: ctx.sql.clone(), ctx, param_types })
    }

    pub fn param_oids(&self) -> Vec<i32> { self.param_types.iter().map(|t| t.oid()).collect() }
}

/// Per-connection statement store, keyed by client-assigned name ("" is the unnamed statement).
#[derive(Debug, Default)]
pub struct PreparedStatementRegistry {
    statements: HashMap<String, Arc<PreparedStatement>>,
}

impl PreparedStatementRegistry {
    pub fn new() -> Self { Self::default() }

    /// The unnamed statement is silently replaced; a named one must be closed first.
    pub fn register(&mut self, stmt: PreparedStatement) -> ProxyResult<Arc<PreparedStatement>> {
        if !stmt.name.is_empty() && self.statements.contains_key(&stmt.name) {
            return Err(ProxyError::DuplicateStatement(stmt.name));
        }
        let stmt = Arc::new(stmt);
        self.statements.insert(stmt.name.clone(), stmt.clone());
        Ok(stmt)
    }

    pub fn get(&self, name: &str) -> ProxyResult<Arc<PreparedStatement>> {
        self.statements.get(name).cloned().ok_or_else(|| ProxyError::UnknownStatement(name.to_string()))
    }

    /// Closing a statement that does not exist is not an error.
    pub fn remove(&mut self, name: &str) -> bool { self.statements.remove(name).is_some() }

    pub fn clear(&mut self) { self.statements.clear(); }

    pub fn len(&self) -> usize { self.statements.len() }

    pub fn is_empty(&self) -> bool { self.statements.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StatementKind;

    fn ctx(sql: &str, inferred: Vec<ColumnType>) -> StatementContext {
        StatementContext { sql: sql.into(), kind: StatementKind::Query, param_types: inferred, columns: vec![] }
    }

    #[test]
    fn parameter_type_resolution() {
        let st = PreparedStatement::new(
            "s".into(),
            ctx("SELECT $1, $2, $3", vec![ColumnType::Int8, ColumnType::Unspecified, ColumnType::Unspecified]),
            &[0, 0, 1700],
        )
        .unwrap();
        assert_eq!(st.param_types, vec![ColumnType::Int8, ColumnType::Text, ColumnType::Numeric]);
        assert_eq!(st.param_oids(), vec![20, 25, 1700]);

        let err = PreparedStatement::new("s".into(), ctx("SELECT $1", vec![]), &[142]).unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedType(142)));
    }

    #[test]
    fn registry_names() {
        let mut reg = PreparedStatementRegistry::new();
        reg.register(PreparedStatement::new("".into(), ctx("SELECT 1", vec![]), &[]).unwrap()).unwrap();
        reg.register(PreparedStatement::new("".into(), ctx("SELECT 2", vec![]), &[]).unwrap()).unwrap();
        assert_eq!(reg.get("").unwrap().sql, "SELECT 2");

        reg.register(PreparedStatement::new("a".into(), ctx("SELECT 3", vec![]), &[]).unwrap()).unwrap();
        let dup = reg.register(PreparedStatement::new("a".into(), ctx("SELECT 4", vec![]), &[]).unwrap());
        assert!(matches!(dup, Err(ProxyError::DuplicateStatement(_))));

        let held = reg.get("a").unwrap();
        assert!(reg.remove("a"));
        assert!(!reg.remove("a"));
        assert_eq!(held.sql, "SELECT 3");
        assert!(matches!(reg.get("a"), Err(ProxyError::UnknownStatement(_))));
        assert_eq!(reg.len(), 1);
    }
}
