use crate::router::placeholder_count;
use parking_lot::RwLock;
use shardgate_protocol::ColumnType;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub sql: String,
    pub parameter_count: usize,
    /// Types from the last execution that sent them, with the unsigned flag.
    pub parameter_types: Vec<(ColumnType, bool)>,
}

/// Statements prepared through COM_STMT_PREPARE, shared by every client
/// connection. Ids are never reused.
pub struct PreparedStatementRegistry {
    next_id: AtomicU32,
    statements: RwLock<HashMap<u32, PreparedStatement>>,
}

impl Default for PreparedStatementRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            statements: RwLock::new(HashMap::new()),
        }
    }
}

impl PreparedStatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&self, sql: &str) -> (u32, usize) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let parameter_count = placeholder_count(sql);
        self.statements.write().insert(
            id,
            PreparedStatement {
                sql: sql.to_string(),
                parameter_count,
                parameter_types: Vec::new(),
            },
        );
        (id, parameter_count)
    }

    pub fn get(&self, id: u32) -> Option<PreparedStatement> {
        self.statements.read().get(&id).cloned()
    }

    pub fn bind_types(&self, id: u32, types: Vec<(ColumnType, bool)>) {
        if let Some(statement) = self.statements.write().get_mut(&id) {
            statement.parameter_types = types;
        }
    }

    pub fn close(&self, id: u32) -> bool {
        self.statements.write().remove(&id).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.statements.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_count_placeholders() {
        let registry = PreparedStatementRegistry::new();
        let (first, params) = registry.prepare("SELECT * FROM t_order WHERE user_id = ? AND status = '?'");
        assert_eq!(params, 1);
        let (second, params) = registry.prepare("SELECT 1");
        assert_eq!(params, 0);
        assert!(second > first);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(first).map(|s| s.sql),
            Some("SELECT * FROM t_order WHERE user_id = ? AND status = '?'".to_string())
        );
    }

    #[test]
    fn remembers_bound_types() {
        let registry = PreparedStatementRegistry::new();
        let (id, _) = registry.prepare("INSERT INTO t (a, b) VALUES (?, ?)");
        assert!(registry.get(id).map(|s| s.parameter_types.is_empty()).unwrap_or(false));
        let types = vec![(ColumnType::LongLong, true), (ColumnType::VarString, false)];
        registry.bind_types(id, types.clone());
        assert_eq!(registry.get(id).map(|s| s.parameter_types), Some(types));
    }

    #[test]
    fn close_removes_statement() {
        let registry = PreparedStatementRegistry::new();
        let (id, _) = registry.prepare("SELECT ?");
        assert!(registry.close(id));
        assert!(!registry.close(id));
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
        let (next, _) = registry.prepare("SELECT ?");
        assert_ne!(next, id);
    }
}
