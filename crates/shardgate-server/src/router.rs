use crate::config::Config;
use shardgate_core::error::ShardgateError;
use shardgate_core::types::{DataValue, ExecutionUnit, StatementKind};
use shardgate_engine::{MergeSpec, OrderKey};
use sqlparser::ast::{
    BinaryOperator, Expr, FromTable, ObjectName, Query, SetExpr, Statement, TableFactor,
    UnaryOperator, Value,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;

/// A statement split into execution units, plus what the merge needs to
/// know about it.
#[derive(Debug)]
pub struct RoutedStatement {
    pub kind: StatementKind,
    pub units: Vec<ExecutionUnit>,
    pub merge: MergeSpec,
}

#[derive(Debug, Clone)]
pub struct ShardRouter {
    data_sources: Vec<String>,
    default_data_source: String,
    /// lower-cased table name to sharding column
    sharding_columns: HashMap<String, String>,
}

impl ShardRouter {
    pub fn new(
        data_sources: Vec<String>,
        default_data_source: impl Into<String>,
        tables: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            data_sources,
            default_data_source: default_data_source.into(),
            sharding_columns: tables
                .into_iter()
                .map(|(table, column)| (table.to_lowercase(), column))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sharding.data_sources.clone(),
            config.default_data_source(),
            config
                .sharding
                .tables
                .iter()
                .map(|rule| (rule.name.clone(), rule.sharding_column.clone())),
        )
    }

    pub fn route(
        &self,
        sql: &str,
        parameters: &[DataValue],
    ) -> Result<RoutedStatement, ShardgateError> {
        let mut statements = parse_sql(sql)?;
        if statements.len() != 1 {
            return Err(ShardgateError::Syntax(format!(
                "expected exactly one statement, found {}",
                statements.len()
            )));
        }
        let stmt = statements.remove(0);
        let kind = statement_kind(&stmt)?;
        let targets = if kind == StatementKind::None {
            Vec::new()
        } else {
            self.targets(&stmt, parameters)?
        };
        let (unit_sql, unit_parameters, merge) = match &stmt {
            Statement::Query(query) if targets.len() > 1 => {
                broadcast_select(query, sql, parameters)?
            }
            _ => (sql.to_string(), parameters.to_vec(), MergeSpec::default()),
        };
        let units = targets
            .into_iter()
            .map(|shard| {
                ExecutionUnit::new(shard, unit_sql.as_str()).with_parameters(unit_parameters.clone())
            })
            .collect();
        Ok(RoutedStatement { kind, units, merge })
    }

    fn targets(
        &self,
        stmt: &Statement,
        parameters: &[DataValue],
    ) -> Result<Vec<String>, ShardgateError> {
        match stmt {
            Statement::Query(query) => {
                let SetExpr::Select(select) = &*query.body else {
                    return Ok(self.default_target());
                };
                let Some(table) = select.from.first().and_then(|from| table_factor_name(&from.relation))
                else {
                    return Ok(self.default_target());
                };
                let before_where = select
                    .projection
                    .iter()
                    .map(|item| placeholder_count(&item.to_string()))
                    .sum::<usize>()
                    + select
                        .from
                        .iter()
                        .map(|from| placeholder_count(&from.to_string()))
                        .sum::<usize>();
                Ok(self.route_filtered(&table, select.selection.as_ref(), before_where, parameters))
            }
            Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => {
                let table = object_name(table_name);
                let Some(column) = self.sharding_column(&table) else {
                    return Ok(self.default_target());
                };
                let position = columns
                    .iter()
                    .position(|c| c.value.eq_ignore_ascii_case(column))
                    .ok_or_else(|| {
                        ShardgateError::Routing(format!(
                            "insert into {table} must name sharding column {column}"
                        ))
                    })?;
                let first_row = source
                    .as_ref()
                    .and_then(|query| match &*query.body {
                        SetExpr::Values(values) => values.rows.first(),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        ShardgateError::NotSupported(format!(
                            "insert into sharded table {table} needs a VALUES list"
                        ))
                    })?;
                let before = first_row
                    .iter()
                    .take(position)
                    .map(|expr| placeholder_count(&expr.to_string()))
                    .sum();
                let value = first_row
                    .get(position)
                    .and_then(|expr| literal_value(expr, before, parameters))
                    .ok_or_else(|| {
                        ShardgateError::Routing(format!(
                            "no usable value for sharding column {column} of {table}"
                        ))
                    })?;
                Ok(vec![self.shard_for(&value)])
            }
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let Some(name) = table_factor_name(&table.relation) else {
                    return Ok(self.default_target());
                };
                let before_where = assignments
                    .iter()
                    .map(|a| placeholder_count(&a.value.to_string()))
                    .sum();
                Ok(self.route_filtered(&name, selection.as_ref(), before_where, parameters))
            }
            Statement::Delete {
                from, selection, ..
            } => {
                let relation = match from {
                    FromTable::WithFromKeyword(relations) => relations.first(),
                    FromTable::WithoutKeyword(relations) => relations.first(),
                };
                let Some(name) = relation.and_then(|r| table_factor_name(&r.relation)) else {
                    return Ok(self.default_target());
                };
                Ok(self.route_filtered(&name, selection.as_ref(), 0, parameters))
            }
            Statement::CreateTable { name, .. } | Statement::AlterTable { name, .. } => {
                Ok(self.route_ddl(&object_name(name)))
            }
            Statement::Truncate { table_name, .. } => Ok(self.route_ddl(&object_name(table_name))),
            Statement::Drop { names, .. } => Ok(names
                .first()
                .map(|name| self.route_ddl(&object_name(name)))
                .unwrap_or_else(|| self.default_target())),
            Statement::CreateIndex { .. } => Ok(self.data_sources.clone()),
            _ => Ok(self.default_target()),
        }
    }

    fn route_filtered(
        &self,
        table: &str,
        selection: Option<&Expr>,
        placeholder_base: usize,
        parameters: &[DataValue],
    ) -> Vec<String> {
        let Some(column) = self.sharding_column(table) else {
            return self.default_target();
        };
        selection
            .and_then(|expr| sharding_condition(expr, column, placeholder_base, parameters))
            .map(|value| vec![self.shard_for(&value)])
            .unwrap_or_else(|| self.data_sources.clone())
    }

    fn route_ddl(&self, table: &str) -> Vec<String> {
        if self.sharding_column(table).is_some() {
            self.data_sources.clone()
        } else {
            self.default_target()
        }
    }

    fn sharding_column(&self, table: &str) -> Option<&str> {
        let simple = table.rsplit('.').next().unwrap_or(table);
        self.sharding_columns
            .get(&simple.to_lowercase())
            .map(String::as_str)
    }

    fn default_target(&self) -> Vec<String> {
        vec![self.default_data_source.clone()]
    }

    fn shard_for(&self, value: &DataValue) -> String {
        let count = self.data_sources.len().max(1);
        let integer = match value {
            DataValue::Int64(v) => Some(*v),
            DataValue::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        let index = match integer {
            Some(v) => v.rem_euclid(count as i64) as usize,
            None => hash_value(&value.to_text().unwrap_or_default()) % count,
        };
        self.data_sources
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.default_data_source.clone())
    }
}

pub fn parse_sql(sql: &str) -> Result<Vec<Statement>, ShardgateError> {
    let dialect = MySqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|err| ShardgateError::Syntax(err.to_string()))
}

pub fn statement_kind(stmt: &Statement) -> Result<StatementKind, ShardgateError> {
    let kind = match stmt {
        Statement::Query(_) => StatementKind::Query,
        Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
            StatementKind::Update
        }
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::AlterTable { .. }
        | Statement::Drop { .. }
        | Statement::Truncate { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowCreate { .. }
        | Statement::Explain { .. }
        | Statement::ExplainTable { .. } => StatementKind::Admin,
        Statement::SetVariable { .. }
        | Statement::SetNames { .. }
        | Statement::SetNamesDefault { .. }
        | Statement::Use { .. }
        | Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. } => StatementKind::None,
        other => {
            let text = other.to_string();
            let verb = text.split_whitespace().next().unwrap_or("statement");
            return Err(ShardgateError::NotSupported(format!(
                "{} is not supported by the proxy",
                verb.to_uppercase()
            )));
        }
    };
    Ok(kind)
}

/// Order and pagination of a SELECT sent to several shards. With an OFFSET
/// every shard is asked for its first `offset + limit` rows and the merge
/// skips `offset`, so the SQL the shards receive is rewritten.
fn broadcast_select(
    query: &Query,
    sql: &str,
    parameters: &[DataValue],
) -> Result<(String, Vec<DataValue>, MergeSpec), ShardgateError> {
    let page = pagination(query, sql, parameters)?;
    let merge = MergeSpec {
        order_by: order_keys(query),
        limit: page.limit,
        offset: page.offset,
    };
    if page.offset == 0 {
        return Ok((sql.to_string(), parameters.to_vec(), merge));
    }
    let mut rewritten = query.clone();
    rewritten.limit = page
        .limit
        .map(|limit| Expr::Value(Value::Number(limit.saturating_add(page.offset).to_string(), false)));
    rewritten.offset = None;
    let mut unit_parameters = parameters.to_vec();
    unit_parameters.truncate(placeholder_count(sql).saturating_sub(page.markers));
    Ok((
        Statement::Query(Box::new(rewritten)).to_string(),
        unit_parameters,
        merge,
    ))
}

/// Keys that are not plain column references leave the rows in unit order.
fn order_keys(query: &Query) -> Vec<OrderKey> {
    let mut order_by = Vec::with_capacity(query.order_by.len());
    for item in &query.order_by {
        let column = match &item.expr {
            Expr::Identifier(ident) => ident.value.clone(),
            Expr::CompoundIdentifier(parts) => match parts.last() {
                Some(part) => part.value.clone(),
                None => return Vec::new(),
            },
            _ => return Vec::new(),
        };
        order_by.push(OrderKey {
            column,
            ascending: item.asc.unwrap_or(true),
        });
    }
    order_by
}

struct Pagination {
    limit: Option<u64>,
    offset: u64,
    /// `?` markers used by LIMIT and OFFSET
    markers: usize,
}

/// LIMIT and OFFSET are the last clauses of a SELECT, so their markers are
/// the last ones in the statement.
fn pagination(
    query: &Query,
    sql: &str,
    parameters: &[DataValue],
) -> Result<Pagination, ShardgateError> {
    let limit = query.limit.as_ref();
    let offset = query.offset.as_ref().map(|offset| &offset.value);
    let clauses = if offset.is_some() && offset_precedes_limit(sql) {
        [("OFFSET", offset), ("LIMIT", limit)]
    } else {
        [("LIMIT", limit), ("OFFSET", offset)]
    };
    let markers = clauses
        .iter()
        .filter(|(_, expr)| matches!(expr, Some(Expr::Value(Value::Placeholder(_)))))
        .count();
    let mut next_marker = placeholder_count(sql).saturating_sub(markers);
    let mut page = Pagination {
        limit: None,
        offset: 0,
        markers,
    };
    for (clause, expr) in clauses {
        let Some(expr) = expr else {
            continue;
        };
        let index = next_marker;
        if matches!(expr, Expr::Value(Value::Placeholder(_))) {
            next_marker += 1;
        }
        let value = literal_value(expr, index, parameters)
            .and_then(|value| value.as_i64())
            .and_then(|value| u64::try_from(value).ok())
            .ok_or_else(|| {
                ShardgateError::Routing(format!(
                    "{clause} of a multi-shard query must be a non-negative integer, found {expr}"
                ))
            })?;
        if clause == "LIMIT" {
            page.limit = Some(value);
        } else {
            page.offset = value;
        }
    }
    Ok(page)
}

/// Whether the offset is written before the row count, as in
/// `LIMIT 5, 10` or `OFFSET 5 LIMIT 10`.
fn offset_precedes_limit(sql: &str) -> bool {
    let lower = sql.to_ascii_lowercase();
    let Some(limit_at) = lower.rfind("limit") else {
        return false;
    };
    lower[limit_at..].contains(',') || lower.rfind("offset").is_some_and(|at| at < limit_at)
}

/// Find a top-level `column = value` conjunct. `placeholder_base` is the
/// number of `?` markers that appear before the expression in the SQL text.
fn sharding_condition(
    selection: &Expr,
    column: &str,
    placeholder_base: usize,
    parameters: &[DataValue],
) -> Option<DataValue> {
    let mut parts = Vec::new();
    conjuncts(selection, &mut parts);
    let mut offset = placeholder_base;
    for part in parts {
        if let Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } = part
        {
            if is_column(left, column) {
                let before = offset + placeholder_count(&left.to_string());
                if let Some(value) = literal_value(right, before, parameters) {
                    return Some(value);
                }
            } else if is_column(right, column) {
                if let Some(value) = literal_value(left, offset, parameters) {
                    return Some(value);
                }
            }
        }
        offset += placeholder_count(&part.to_string());
    }
    None
}

fn conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        Expr::Nested(inner) => conjuncts(inner, out),
        other => out.push(other),
    }
}

fn is_column(expr: &Expr, column: &str) -> bool {
    match expr {
        Expr::Identifier(ident) => ident.value.eq_ignore_ascii_case(column),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|part| part.value.eq_ignore_ascii_case(column))
            .unwrap_or(false),
        Expr::Nested(inner) => is_column(inner, column),
        _ => false,
    }
}

/// Literal or bound parameter; `placeholder` is the index a `?` here would
/// take. NULL and anything computed yield `None`.
fn literal_value(expr: &Expr, placeholder: usize, parameters: &[DataValue]) -> Option<DataValue> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n
            .parse::<i64>()
            .map(DataValue::Int64)
            .ok()
            .or_else(|| n.parse::<f64>().ok().map(DataValue::Float64)),
        Expr::Value(Value::SingleQuotedString(s)) | Expr::Value(Value::DoubleQuotedString(s)) => {
            Some(DataValue::String(s.clone()))
        }
        Expr::Value(Value::Boolean(b)) => Some(DataValue::Bool(*b)),
        Expr::Value(Value::Placeholder(_)) => parameters
            .get(placeholder)
            .filter(|value| !value.is_null())
            .cloned(),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr, placeholder, parameters)? {
            DataValue::Int64(v) => Some(DataValue::Int64(-v)),
            DataValue::Float64(v) => Some(DataValue::Float64(-v)),
            _ => None,
        },
        Expr::Nested(inner) => literal_value(inner, placeholder, parameters),
        _ => None,
    }
}

fn table_factor_name(relation: &TableFactor) -> Option<String> {
    match relation {
        TableFactor::Table { name, .. } => Some(object_name(name)),
        _ => None,
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn hash_value(bytes: &[u8]) -> usize {
    let mut hash = 0usize;
    for b in bytes {
        hash = hash.wrapping_mul(31).wrapping_add(*b as usize);
    }
    hash
}

/// Number of `?` parameter markers outside quoted strings and identifiers.
pub fn placeholder_count(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == '\\' && q != '`' {
                    chars.next();
                } else if ch == q {
                    if chars.peek() == Some(&q) {
                        chars.next();
                    } else {
                        quote = None;
                    }
                }
            }
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '?' => count += 1,
                _ => {}
            },
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ShardRouter {
        ShardRouter::new(
            vec!["ds_0".into(), "ds_1".into()],
            "ds_0",
            vec![("t_order".to_string(), "user_id".to_string())],
        )
    }

    fn shards(routed: &RoutedStatement) -> Vec<&str> {
        routed.units.iter().map(|u| u.shard_id.as_str()).collect()
    }

    #[test]
    fn select_with_sharding_value_hits_one_shard() {
        let routed = router()
            .route("SELECT * FROM t_order WHERE user_id = 7", &[])
            .expect("route");
        assert_eq!(routed.kind, StatementKind::Query);
        assert_eq!(shards(&routed), vec!["ds_1"]);
        assert_eq!(routed.units[0].sql, "SELECT * FROM t_order WHERE user_id = 7");
    }

    #[test]
    fn select_without_sharding_value_is_broadcast() {
        let routed = router()
            .route("SELECT * FROM t_order WHERE status = 'paid' OR user_id = 1", &[])
            .expect("route");
        assert_eq!(shards(&routed), vec!["ds_0", "ds_1"]);
    }

    #[test]
    fn placeholders_bind_in_text_order() {
        let params = vec![DataValue::String("paid".into()), DataValue::Int64(3)];
        let routed = router()
            .route(
                "SELECT * FROM t_order WHERE status = ? AND user_id = ?",
                &params,
            )
            .expect("route");
        assert_eq!(shards(&routed), vec!["ds_1"]);
        assert_eq!(routed.units[0].parameters, params);
    }

    #[test]
    fn insert_routes_by_first_row() {
        let r = router();
        let routed = r
            .route(
                "INSERT INTO t_order (order_id, user_id) VALUES (?, ?), (?, ?)",
                &[
                    DataValue::Int64(1),
                    DataValue::Int64(4),
                    DataValue::Int64(2),
                    DataValue::Int64(5),
                ],
            )
            .expect("route");
        assert_eq!(routed.kind, StatementKind::Update);
        assert_eq!(shards(&routed), vec!["ds_0"]);

        let routed = r
            .route("INSERT INTO t_order (user_id, status) VALUES (-3, 'x')", &[])
            .expect("route");
        assert_eq!(shards(&routed), vec!["ds_1"]);

        let routed = r
            .route("INSERT INTO t_order (user_id) VALUES ('8')", &[])
            .expect("route");
        assert_eq!(shards(&routed), vec!["ds_0"]);
    }

    #[test]
    fn non_integer_values_are_hashed() {
        let routed = router()
            .route("SELECT * FROM t_order WHERE user_id = 'abc'", &[])
            .expect("route");
        let expected = format!("ds_{}", hash_value(b"abc") % 2);
        assert_eq!(shards(&routed), vec![expected.as_str()]);
    }

    #[test]
    fn insert_without_sharding_column_is_rejected() {
        let err = router()
            .route("INSERT INTO t_order (order_id) VALUES (1)", &[])
            .expect_err("routing error");
        assert!(matches!(err, ShardgateError::Routing(_)));
    }

    #[test]
    fn update_and_delete_use_where_clause() {
        let r = router();
        let routed = r
            .route(
                "UPDATE t_order SET status = ? WHERE user_id = ?",
                &[DataValue::String("done".into()), DataValue::Int64(2)],
            )
            .expect("route");
        assert_eq!(routed.kind, StatementKind::Update);
        assert_eq!(shards(&routed), vec!["ds_0"]);

        let routed = r
            .route("DELETE FROM t_order WHERE order_id > 10", &[])
            .expect("route");
        assert_eq!(shards(&routed), vec!["ds_0", "ds_1"]);
    }

    #[test]
    fn unsharded_tables_use_default_source() {
        let r = router();
        let routed = r.route("SELECT * FROM t_config", &[]).expect("route");
        assert_eq!(shards(&routed), vec!["ds_0"]);
        let routed = r.route("SELECT 1", &[]).expect("route");
        assert_eq!(shards(&routed), vec!["ds_0"]);
        let routed = r
            .route("SELECT @@version_comment LIMIT 1", &[])
            .expect("route");
        assert_eq!(shards(&routed), vec!["ds_0"]);
    }

    #[test]
    fn ddl_and_show_are_admin() {
        let r = router();
        let routed = r
            .route("CREATE TABLE t_order (order_id BIGINT, user_id INT)", &[])
            .expect("route");
        assert_eq!(routed.kind, StatementKind::Admin);
        assert_eq!(shards(&routed), vec!["ds_0", "ds_1"]);

        let routed = r.route("DROP TABLE t_config", &[]).expect("route");
        assert_eq!(shards(&routed), vec!["ds_0"]);

        let routed = r.route("SHOW TABLES", &[]).expect("route");
        assert_eq!(routed.kind, StatementKind::Admin);
        assert_eq!(shards(&routed), vec!["ds_0"]);
    }

    #[test]
    fn session_statements_have_no_units() {
        let r = router();
        for sql in ["SET autocommit = 1", "BEGIN", "COMMIT", "ROLLBACK", "USE shop"] {
            let routed = r.route(sql, &[]).expect(sql);
            assert_eq!(routed.kind, StatementKind::None, "{sql}");
            assert!(routed.units.is_empty(), "{sql}");
        }
    }

    #[test]
    fn rejects_bad_input() {
        let r = router();
        assert!(matches!(
            r.route("SELECT 1; SELECT 2", &[]),
            Err(ShardgateError::Syntax(_))
        ));
        assert!(matches!(r.route("SELEC 1", &[]), Err(ShardgateError::Syntax(_))));
        assert!(matches!(r.route("", &[]), Err(ShardgateError::Syntax(_))));
    }

    #[test]
    fn broadcast_select_carries_merge_spec() {
        let r = router();
        let routed = r
            .route(
                "SELECT order_id, user_id FROM t_order ORDER BY t_order.order_id DESC, user_id LIMIT 5",
                &[],
            )
            .expect("route");
        assert_eq!(routed.units.len(), 2);
        assert_eq!(
            routed.merge.order_by,
            vec![
                OrderKey {
                    column: "order_id".into(),
                    ascending: false
                },
                OrderKey {
                    column: "user_id".into(),
                    ascending: true
                },
            ]
        );
        assert_eq!(routed.merge.limit, Some(5));

        let routed = r
            .route("SELECT * FROM t_order ORDER BY order_id LIMIT ?", &[DataValue::Int64(3)])
            .expect("route");
        assert_eq!(routed.merge.limit, Some(3));

        let routed = r
            .route("SELECT * FROM t_order WHERE user_id = 1 ORDER BY order_id", &[])
            .expect("route");
        assert_eq!(routed.merge, MergeSpec::default());
    }

    #[test]
    fn broadcast_offset_moves_into_the_merge() {
        let r = router();
        let routed = r
            .route("SELECT order_id FROM t_order ORDER BY order_id LIMIT 2 OFFSET 1", &[])
            .expect("route");
        assert_eq!(routed.units.len(), 2);
        assert_eq!((routed.merge.limit, routed.merge.offset), (Some(2), 1));
        for unit in &routed.units {
            assert_eq!(unit.sql, "SELECT order_id FROM t_order ORDER BY order_id LIMIT 3");
        }

        let routed = r
            .route("SELECT order_id FROM t_order ORDER BY order_id LIMIT 4, 10", &[])
            .expect("route");
        assert_eq!((routed.merge.limit, routed.merge.offset), (Some(10), 4));
        assert_eq!(routed.units[0].sql, "SELECT order_id FROM t_order ORDER BY order_id LIMIT 14");

        let params = vec![DataValue::String("new".into()), DataValue::Int64(5), DataValue::Int64(20)];
        let routed = r
            .route(
                "SELECT order_id FROM t_order WHERE status = ? ORDER BY order_id LIMIT ? OFFSET ?",
                &params,
            )
            .expect("route");
        assert_eq!((routed.merge.limit, routed.merge.offset), (Some(5), 20));
        assert_eq!(
            routed.units[0].sql,
            "SELECT order_id FROM t_order WHERE status = ? ORDER BY order_id LIMIT 25"
        );
        assert_eq!(routed.units[0].parameters, vec![DataValue::String("new".into())]);

        let routed = r
            .route(
                "SELECT order_id FROM t_order ORDER BY order_id LIMIT ?, ?",
                &[DataValue::Int64(3), DataValue::Int64(7)],
            )
            .expect("route");
        assert_eq!((routed.merge.limit, routed.merge.offset), (Some(7), 3));
        assert!(routed.units[0].parameters.is_empty());

        let routed = r
            .route(
                "SELECT order_id FROM t_order OFFSET ? LIMIT ?",
                &[DataValue::Int64(3), DataValue::Int64(7)],
            )
            .expect("route");
        assert_eq!((routed.merge.limit, routed.merge.offset), (Some(7), 3));

        // a single shard applies its own pagination
        let routed = r
            .route("SELECT * FROM t_order WHERE user_id = 1 LIMIT 2 OFFSET 1", &[])
            .expect("route");
        assert_eq!(routed.units.len(), 1);
        assert_eq!(routed.units[0].sql, "SELECT * FROM t_order WHERE user_id = 1 LIMIT 2 OFFSET 1");
        assert_eq!(routed.merge, MergeSpec::default());

        let err = r
            .route("SELECT * FROM t_order LIMIT ? OFFSET ?", &[DataValue::Int64(2)])
            .expect_err("missing parameter");
        assert!(matches!(err, ShardgateError::Routing(_)));
    }

    #[test]
    fn counts_placeholders_outside_quotes() {
        assert_eq!(placeholder_count("SELECT ? FROM t WHERE a = ?"), 2);
        assert_eq!(placeholder_count("SELECT '?', \"?\", `?` FROM t WHERE a = ?"), 1);
        assert_eq!(placeholder_count("SELECT 'it\\'s ?', 'a''?' FROM t"), 0);
        assert_eq!(placeholder_count("SELECT 1"), 0);
    }
}
