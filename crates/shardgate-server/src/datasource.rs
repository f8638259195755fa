use crate::router::parse_sql;
use parking_lot::Mutex;
use shardgate_core::error::ShardgateError;
use shardgate_core::types::{ColumnMeta, DataValue, Row};
use shardgate_engine::strategy::compare_values;
use shardgate_engine::{DataSource, DriverResult, RowCursor, ShardConnection, UpdateResult};
use sqlparser::ast::{
    BinaryOperator, ColumnDef, Expr, FromTable, ObjectName, ObjectType, OrderByExpr, Query,
    SelectItem, SetExpr, Statement, TableFactor, UnaryOperator, Value,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const VERSION_COMMENT: &str = "shardgate";

/// A backing database kept in process memory. Every connection handed out
/// shares the same tables.
#[derive(Clone)]
pub struct MemoryDataSource {
    name: String,
    database: Arc<Mutex<Database>>,
}

impl MemoryDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: Arc::new(Mutex::new(Database::default())),
        }
    }
}

impl DataSource for MemoryDataSource {
    fn connection(&self) -> Result<Box<dyn ShardConnection>, ShardgateError> {
        Ok(Box::new(MemoryConnection {
            name: self.name.clone(),
            database: self.database.clone(),
        }))
    }
}

#[derive(Default)]
struct Database {
    /// keyed by lower-cased table name
    tables: BTreeMap<String, Table>,
}

struct Table {
    name: String,
    columns: Vec<TableColumn>,
    rows: Vec<Row>,
    next_id: u64,
}

#[derive(Debug, Clone)]
struct TableColumn {
    name: String,
    data_type: String,
    auto_increment: bool,
}

impl Database {
    fn table(&self, name: &str) -> Result<&Table, ShardgateError> {
        self.tables.get(&table_key(name)).ok_or_else(|| unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, ShardgateError> {
        self.tables
            .get_mut(&table_key(name))
            .ok_or_else(|| unknown_table(name))
    }
}

/// Schema qualifiers are ignored; each data source is one schema.
fn table_key(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_lowercase()
}

struct MemoryConnection {
    name: String,
    database: Arc<Mutex<Database>>,
}

impl MemoryConnection {
    fn parse(&self, sql: &str) -> Result<Statement, ShardgateError> {
        let mut statements = parse_sql(sql).map_err(|err| {
            ShardgateError::driver(1064, "42000", format!("You have an error in your SQL syntax: {err}"))
        })?;
        if statements.len() != 1 {
            return Err(ShardgateError::driver(
                1064,
                "42000",
                "exactly one statement is accepted per call",
            ));
        }
        Ok(statements.remove(0))
    }

    fn run(&self, stmt: &Statement, parameters: &[DataValue]) -> Result<Execution, ShardgateError> {
        let mut binder = Binder::new(parameters);
        let mut database = self.database.lock();
        debug!(source = %self.name, "executing {stmt}");
        match stmt {
            Statement::Query(query) => select(&database, query, &mut binder).map(Execution::Rows),
            Statement::ShowTables { .. } => {
                let columns = vec![ColumnMeta::new("", format!("Tables_in_{}", self.name), "VARCHAR(64)")];
                let rows = database
                    .tables
                    .values()
                    .map(|table| vec![DataValue::String(table.name.clone())])
                    .collect();
                Ok(Execution::Rows((columns, rows)))
            }
            Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => insert(&mut database, table_name, columns, source.as_deref(), &mut binder),
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let name = relation_name(&table.relation)?;
                let table = database.table_mut(&name)?;
                let mut compiled = Vec::with_capacity(assignments.len());
                for assignment in assignments {
                    let column = assignment
                        .id
                        .last()
                        .map(|ident| ident.value.clone())
                        .unwrap_or_default();
                    let index = column_index(&table.columns, &column, "field list")?;
                    let value = compile(&assignment.value, &table.columns, &mut binder, "field list")?;
                    compiled.push((index, value));
                }
                let filter = compile_filter(selection.as_ref(), &table.columns, &mut binder)?;
                let mut affected = 0;
                for row in table.rows.iter_mut() {
                    if !filter.as_ref().map_or(true, |f| f.matches(row)) {
                        continue;
                    }
                    let values: Vec<DataValue> = compiled.iter().map(|(_, v)| v.eval(row)).collect();
                    for ((index, _), value) in compiled.iter().zip(values) {
                        row[*index] = coerce(value, &table.columns[*index].data_type);
                    }
                    affected += 1;
                }
                Ok(Execution::Count(affected, Vec::new()))
            }
            Statement::Delete { from, selection, .. } => {
                let relation = match from {
                    FromTable::WithFromKeyword(relations) => relations.first(),
                    FromTable::WithoutKeyword(relations) => relations.first(),
                }
                .ok_or_else(|| not_supported("DELETE without a table"))?;
                let name = relation_name(&relation.relation)?;
                let table = database.table_mut(&name)?;
                let filter = compile_filter(selection.as_ref(), &table.columns, &mut binder)?;
                let before = table.rows.len();
                table
                    .rows
                    .retain(|row| !filter.as_ref().map_or(true, |f| f.matches(row)));
                Ok(Execution::Count((before - table.rows.len()) as u64, Vec::new()))
            }
            Statement::CreateTable {
                name,
                columns,
                if_not_exists,
                ..
            } => create_table(&mut database, name, columns, *if_not_exists),
            Statement::Drop {
                object_type,
                if_exists,
                names,
                ..
            } => {
                if *object_type != ObjectType::Table {
                    return Err(not_supported(&format!("DROP {object_type}")));
                }
                for name in names {
                    let name = object_name(name);
                    if database.tables.remove(&table_key(&name)).is_none() && !*if_exists {
                        return Err(ShardgateError::driver(
                            1051,
                            "42S02",
                            format!("Unknown table '{name}'"),
                        ));
                    }
                }
                Ok(Execution::Count(0, Vec::new()))
            }
            Statement::Truncate { table_name, .. } => {
                database.table_mut(&object_name(table_name))?.rows.clear();
                Ok(Execution::Count(0, Vec::new()))
            }
            Statement::SetVariable { .. }
            | Statement::SetNames { .. }
            | Statement::SetNamesDefault { .. }
            | Statement::Use { .. }
            | Statement::StartTransaction { .. }
            | Statement::Commit { .. }
            | Statement::Rollback { .. } => Ok(Execution::Count(0, Vec::new())),
            other => {
                let text = other.to_string();
                Err(not_supported(text.split_whitespace().next().unwrap_or("statement")))
            }
        }
    }
}

enum Execution {
    Rows((Vec<ColumnMeta>, Vec<Row>)),
    Count(u64, Vec<u64>),
}

impl ShardConnection for MemoryConnection {
    fn execute_query(
        &mut self,
        sql: &str,
        parameters: &[DataValue],
    ) -> Result<Box<dyn RowCursor>, ShardgateError> {
        let stmt = self.parse(sql)?;
        match self.run(&stmt, parameters)? {
            Execution::Rows((columns, rows)) => Ok(Box::new(MemoryCursor::new(columns, rows))),
            Execution::Count(..) => Err(ShardgateError::driver(
                1105,
                "HY000",
                "statement did not produce a result set",
            )),
        }
    }

    fn execute_update(
        &mut self,
        sql: &str,
        parameters: &[DataValue],
        return_generated_keys: bool,
    ) -> Result<UpdateResult, ShardgateError> {
        let stmt = self.parse(sql)?;
        match self.run(&stmt, parameters)? {
            Execution::Count(affected_rows, keys) => Ok(UpdateResult {
                affected_rows,
                generated_keys: if return_generated_keys { keys } else { Vec::new() },
            }),
            Execution::Rows(_) => Err(ShardgateError::driver(
                1105,
                "HY000",
                "statement produced a result set",
            )),
        }
    }

    fn execute(
        &mut self,
        sql: &str,
        parameters: &[DataValue],
    ) -> Result<DriverResult, ShardgateError> {
        let stmt = self.parse(sql)?;
        Ok(match self.run(&stmt, parameters)? {
            Execution::Rows((columns, rows)) => {
                DriverResult::ResultSet(Box::new(MemoryCursor::new(columns, rows)))
            }
            Execution::Count(affected, _) => DriverResult::UpdateCount(affected),
        })
    }
}

/// Rows are copied out under the lock; the cursor never holds it.
struct MemoryCursor {
    columns: Vec<ColumnMeta>,
    rows: std::vec::IntoIter<Row>,
}

impl MemoryCursor {
    fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }
}

impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>, ShardgateError> {
        Ok(self.rows.next())
    }
}

/// Hands out bound parameters in the order their `?` markers were met.
struct Binder<'a> {
    parameters: &'a [DataValue],
    next: usize,
}

impl<'a> Binder<'a> {
    fn new(parameters: &'a [DataValue]) -> Self {
        Self {
            parameters,
            next: 0,
        }
    }

    fn bind(&mut self) -> Result<DataValue, ShardgateError> {
        let value = self.parameters.get(self.next).cloned().ok_or_else(|| {
            ShardgateError::driver(1210, "HY000", "Incorrect arguments to EXECUTE")
        })?;
        self.next += 1;
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy)]
enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

/// An expression with columns resolved to row positions and parameters bound.
#[derive(Debug, Clone)]
enum Scalar {
    Column(usize),
    Literal(DataValue),
    Negate(Box<Scalar>),
    Compare(Box<Scalar>, CompareOp, Box<Scalar>),
    And(Box<Scalar>, Box<Scalar>),
    Or(Box<Scalar>, Box<Scalar>),
    Not(Box<Scalar>),
    IsNull(Box<Scalar>, bool),
}

impl Scalar {
    fn eval(&self, row: &[DataValue]) -> DataValue {
        match self {
            Scalar::Column(index) => row.get(*index).cloned().unwrap_or(DataValue::Null),
            Scalar::Literal(value) => value.clone(),
            Scalar::Negate(inner) => match inner.eval(row) {
                DataValue::Int64(v) => DataValue::Int64(v.wrapping_neg()),
                DataValue::Null => DataValue::Null,
                other => other
                    .as_f64()
                    .map(|v| DataValue::Float64(-v))
                    .unwrap_or(DataValue::Null),
            },
            Scalar::Compare(left, op, right) => {
                let (left, right) = (left.eval(row), right.eval(row));
                if left.is_null() || right.is_null() {
                    DataValue::Null
                } else {
                    DataValue::Bool(op.holds(compare_sql(&left, &right)))
                }
            }
            Scalar::And(left, right) => match (truth(&left.eval(row)), truth(&right.eval(row))) {
                (Some(false), _) | (_, Some(false)) => DataValue::Bool(false),
                (Some(true), Some(true)) => DataValue::Bool(true),
                _ => DataValue::Null,
            },
            Scalar::Or(left, right) => match (truth(&left.eval(row)), truth(&right.eval(row))) {
                (Some(true), _) | (_, Some(true)) => DataValue::Bool(true),
                (Some(false), Some(false)) => DataValue::Bool(false),
                _ => DataValue::Null,
            },
            Scalar::Not(inner) => match truth(&inner.eval(row)) {
                Some(value) => DataValue::Bool(!value),
                None => DataValue::Null,
            },
            Scalar::IsNull(inner, negated) => DataValue::Bool(inner.eval(row).is_null() != *negated),
        }
    }

    fn matches(&self, row: &[DataValue]) -> bool {
        truth(&self.eval(row)) == Some(true)
    }
}

fn truth(value: &DataValue) -> Option<bool> {
    match value {
        DataValue::Null => None,
        DataValue::Bool(b) => Some(*b),
        other => Some(other.as_f64().map_or(false, |v| v != 0.0)),
    }
}

/// Numbers compare numerically, also against numeric strings.
fn compare_sql(left: &DataValue, right: &DataValue) -> Ordering {
    let numeric = |v: &DataValue| {
        matches!(
            v,
            DataValue::Int64(_) | DataValue::Float64(_) | DataValue::Bool(_)
        )
    };
    if let (DataValue::Int64(l), DataValue::Int64(r)) = (left, right) {
        return l.cmp(r);
    }
    if numeric(left) || numeric(right) {
        if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
            return l.partial_cmp(&r).unwrap_or(Ordering::Equal);
        }
    }
    compare_values(Some(left), Some(right))
}

fn compile(
    expr: &Expr,
    columns: &[TableColumn],
    binder: &mut Binder<'_>,
    clause: &str,
) -> Result<Scalar, ShardgateError> {
    let scalar = match expr {
        Expr::Identifier(ident) if ident.value.starts_with("@@") => {
            Scalar::Literal(system_variable(&ident.value))
        }
        Expr::Identifier(ident) => Scalar::Column(column_index(columns, &ident.value, clause)?),
        Expr::CompoundIdentifier(parts) => {
            let first = parts.first().map(|p| p.value.as_str()).unwrap_or_default();
            let last = parts.last().map(|p| p.value.clone()).unwrap_or_default();
            if first.starts_with("@@") {
                Scalar::Literal(system_variable(&last))
            } else {
                Scalar::Column(column_index(columns, &last, clause)?)
            }
        }
        Expr::Value(Value::Placeholder(_)) => Scalar::Literal(binder.bind()?),
        Expr::Value(value) => Scalar::Literal(literal(value)?),
        Expr::Nested(inner) => compile(inner, columns, binder, clause)?,
        Expr::UnaryOp { op, expr } => {
            let inner = compile(expr, columns, binder, clause)?;
            match op {
                UnaryOperator::Minus => Scalar::Negate(Box::new(inner)),
                UnaryOperator::Plus => inner,
                UnaryOperator::Not => Scalar::Not(Box::new(inner)),
                other => return Err(not_supported(&format!("operator {other}"))),
            }
        }
        Expr::IsNull(inner) => Scalar::IsNull(Box::new(compile(inner, columns, binder, clause)?), false),
        Expr::IsNotNull(inner) => {
            Scalar::IsNull(Box::new(compile(inner, columns, binder, clause)?), true)
        }
        Expr::BinaryOp { left, op, right } => {
            let left = Box::new(compile(left, columns, binder, clause)?);
            let right = Box::new(compile(right, columns, binder, clause)?);
            let compare = match op {
                BinaryOperator::And => return Ok(Scalar::And(left, right)),
                BinaryOperator::Or => return Ok(Scalar::Or(left, right)),
                BinaryOperator::Eq => CompareOp::Eq,
                BinaryOperator::NotEq => CompareOp::NotEq,
                BinaryOperator::Lt => CompareOp::Lt,
                BinaryOperator::LtEq => CompareOp::LtEq,
                BinaryOperator::Gt => CompareOp::Gt,
                BinaryOperator::GtEq => CompareOp::GtEq,
                other => return Err(not_supported(&format!("operator {other}"))),
            };
            Scalar::Compare(left, compare, right)
        }
        other => return Err(not_supported(&other.to_string())),
    };
    Ok(scalar)
}

fn compile_filter(
    selection: Option<&Expr>,
    columns: &[TableColumn],
    binder: &mut Binder<'_>,
) -> Result<Option<Scalar>, ShardgateError> {
    selection
        .map(|expr| compile(expr, columns, binder, "where clause"))
        .transpose()
}

fn literal(value: &Value) -> Result<DataValue, ShardgateError> {
    match value {
        Value::Number(n, _) => n
            .parse::<i64>()
            .map(DataValue::Int64)
            .or_else(|_| n.parse::<f64>().map(DataValue::Float64))
            .map_err(|_| ShardgateError::driver(1064, "42000", format!("bad number {n}"))),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Ok(DataValue::String(s.clone())),
        Value::Boolean(b) => Ok(DataValue::Bool(*b)),
        Value::Null => Ok(DataValue::Null),
        other => Err(not_supported(&other.to_string())),
    }
}

fn system_variable(name: &str) -> DataValue {
    let name = name.trim_start_matches('@').to_lowercase();
    let name = name
        .strip_prefix("session.")
        .or_else(|| name.strip_prefix("global."))
        .unwrap_or(&name);
    match name {
        "version_comment" => DataValue::String(VERSION_COMMENT.into()),
        "version" => DataValue::String("8.0.33".into()),
        "autocommit" | "auto_increment_increment" => DataValue::Int64(1),
        "max_allowed_packet" => DataValue::Int64(64 * 1024 * 1024),
        "tx_isolation" | "transaction_isolation" => DataValue::String("REPEATABLE-READ".into()),
        "character_set_client" | "character_set_connection" | "character_set_results" => {
            DataValue::String("utf8mb4".into())
        }
        "sql_mode" => DataValue::String(String::new()),
        "lower_case_table_names" => DataValue::Int64(0),
        _ => DataValue::Null,
    }
}

fn select(
    database: &Database,
    query: &Query,
    binder: &mut Binder<'_>,
) -> Result<(Vec<ColumnMeta>, Vec<Row>), ShardgateError> {
    let SetExpr::Select(select) = &*query.body else {
        return Err(not_supported("set operations"));
    };
    let no_columns: &[TableColumn] = &[];
    let (table_name, table_columns, source_rows): (String, &[TableColumn], Vec<&Row>) =
        match select.from.as_slice() {
            [] => (String::new(), no_columns, Vec::new()),
            [from] if from.joins.is_empty() => {
                let table = database.table(&relation_name(&from.relation)?)?;
                (
                    table.name.clone(),
                    table.columns.as_slice(),
                    table.rows.iter().collect(),
                )
            }
            _ => return Err(not_supported("joins")),
        };

    let mut outputs: Vec<(ColumnMeta, Scalar)> = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                for (index, column) in table_columns.iter().enumerate() {
                    outputs.push((
                        ColumnMeta::new(table_name.clone(), column.name.clone(), column.data_type.clone()),
                        Scalar::Column(index),
                    ));
                }
            }
            SelectItem::UnnamedExpr(expr) => {
                let scalar = compile(expr, table_columns, binder, "field list")?;
                let label = match expr {
                    Expr::Identifier(ident) => ident.value.clone(),
                    Expr::CompoundIdentifier(parts) if !is_variable(expr) => {
                        parts.last().map(|p| p.value.clone()).unwrap_or_default()
                    }
                    other => other.to_string(),
                };
                outputs.push((output_meta(&table_name, table_columns, &scalar, label), scalar));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let scalar = compile(expr, table_columns, binder, "field list")?;
                outputs.push((
                    output_meta(&table_name, table_columns, &scalar, alias.value.clone()),
                    scalar,
                ));
            }
        }
    }

    let filter = compile_filter(select.selection.as_ref(), table_columns, binder)?;
    let limit = query
        .limit
        .as_ref()
        .map(|expr| row_count(expr, binder))
        .transpose()?;
    let offset = query
        .offset
        .as_ref()
        .map(|offset| row_count(&offset.value, binder))
        .transpose()?
        .unwrap_or(0);

    let mut matched: Vec<(&[DataValue], Row)> = Vec::new();
    if select.from.is_empty() {
        let empty: &[DataValue] = &[];
        if filter.as_ref().map_or(true, |f| f.matches(empty)) {
            matched.push((empty, outputs.iter().map(|(_, s)| s.eval(empty)).collect()));
        }
    } else {
        for row in source_rows {
            if filter.as_ref().map_or(true, |f| f.matches(row)) {
                let projected = outputs.iter().map(|(_, s)| s.eval(row)).collect();
                matched.push((row.as_slice(), projected));
            }
        }
    }

    if !query.order_by.is_empty() {
        let keys = order_keys(&query.order_by, &outputs, table_columns)?;
        matched.sort_by(|(left_row, left_out), (right_row, right_out)| {
            for (key, ascending) in &keys {
                let (l, r) = match key {
                    SortKey::Output(i) => (left_out.get(*i), right_out.get(*i)),
                    SortKey::Table(i) => (left_row.get(*i), right_row.get(*i)),
                };
                let ordering = compare_values(l, r);
                let ordering = if *ascending { ordering } else { ordering.reverse() };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let rows = matched
        .into_iter()
        .map(|(_, projected)| projected)
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    Ok((outputs.into_iter().map(|(meta, _)| meta).collect(), rows))
}

enum SortKey {
    Output(usize),
    Table(usize),
}

/// Output labels win over table columns; numbers are 1-based output positions.
fn order_keys(
    order_by: &[OrderByExpr],
    outputs: &[(ColumnMeta, Scalar)],
    columns: &[TableColumn],
) -> Result<Vec<(SortKey, bool)>, ShardgateError> {
    let mut keys = Vec::with_capacity(order_by.len());
    for item in order_by {
        let key = match &item.expr {
            Expr::Value(Value::Number(n, _)) => {
                let position: usize = n.parse().unwrap_or(0);
                if position == 0 || position > outputs.len() {
                    return Err(unknown_column(n, "order clause"));
                }
                SortKey::Output(position - 1)
            }
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                let name = match &item.expr {
                    Expr::Identifier(ident) => ident.value.clone(),
                    Expr::CompoundIdentifier(parts) => {
                        parts.last().map(|p| p.value.clone()).unwrap_or_default()
                    }
                    _ => String::new(),
                };
                match outputs
                    .iter()
                    .position(|(meta, _)| meta.label.eq_ignore_ascii_case(&name))
                {
                    Some(index) => SortKey::Output(index),
                    None => SortKey::Table(column_index(columns, &name, "order clause")?),
                }
            }
            other => return Err(not_supported(&format!("ORDER BY {other}"))),
        };
        keys.push((key, item.asc.unwrap_or(true)));
    }
    Ok(keys)
}

fn row_count(expr: &Expr, binder: &mut Binder<'_>) -> Result<usize, ShardgateError> {
    let value = match expr {
        Expr::Value(Value::Placeholder(_)) => binder.bind()?,
        Expr::Value(value) => literal(value)?,
        other => return Err(not_supported(&format!("LIMIT {other}"))),
    };
    value
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ShardgateError::driver(1064, "42000", "LIMIT and OFFSET take a non-negative integer"))
}

fn output_meta(table: &str, columns: &[TableColumn], scalar: &Scalar, label: String) -> ColumnMeta {
    let mut meta = match scalar {
        Scalar::Column(index) => {
            let column = &columns[*index];
            ColumnMeta::new(table, column.name.clone(), column.data_type.clone())
        }
        Scalar::Literal(value) => ColumnMeta::new("", label.clone(), type_name(value)),
        _ => ColumnMeta::new("", label.clone(), "BIGINT"),
    };
    meta.label = label;
    meta
}

fn is_variable(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(ident) => ident.value.starts_with("@@"),
        Expr::CompoundIdentifier(parts) => parts
            .first()
            .map(|p| p.value.starts_with("@@"))
            .unwrap_or(false),
        _ => false,
    }
}

fn type_name(value: &DataValue) -> &'static str {
    match value {
        DataValue::Int64(_) => "BIGINT",
        DataValue::Float64(_) => "DOUBLE",
        DataValue::Bool(_) => "TINYINT",
        DataValue::Bytes(_) => "BLOB",
        DataValue::String(_) | DataValue::Null => "VARCHAR",
    }
}

fn insert(
    database: &mut Database,
    table_name: &ObjectName,
    columns: &[sqlparser::ast::Ident],
    source: Option<&Query>,
    binder: &mut Binder<'_>,
) -> Result<Execution, ShardgateError> {
    let table = database.table_mut(&object_name(table_name))?;
    let targets = if columns.is_empty() {
        (0..table.columns.len()).collect::<Vec<_>>()
    } else {
        columns
            .iter()
            .map(|ident| column_index(&table.columns, &ident.value, "field list"))
            .collect::<Result<Vec<_>, _>>()?
    };
    let Some(SetExpr::Values(values)) = source.map(|query| &*query.body) else {
        return Err(not_supported("INSERT without VALUES"));
    };

    let mut pending = Vec::with_capacity(values.rows.len());
    for (number, exprs) in values.rows.iter().enumerate() {
        if exprs.len() != targets.len() {
            return Err(ShardgateError::driver(
                1136,
                "21S01",
                format!("Column count doesn't match value count at row {}", number + 1),
            ));
        }
        let mut row = vec![DataValue::Null; table.columns.len()];
        for (index, expr) in targets.iter().zip(exprs) {
            let value = compile(expr, &[], binder, "field list")?.eval(&[]);
            row[*index] = coerce(value, &table.columns[*index].data_type);
        }
        pending.push(row);
    }

    let mut generated = Vec::new();
    for row in pending.iter_mut() {
        for (index, column) in table.columns.iter().enumerate() {
            if !column.auto_increment {
                continue;
            }
            match row[index].as_i64() {
                Some(id) if id > 0 => table.next_id = table.next_id.max(id as u64 + 1),
                _ => {
                    let id = table.next_id.max(1);
                    table.next_id = id + 1;
                    row[index] = DataValue::Int64(id as i64);
                    generated.push(id);
                }
            }
        }
    }
    let affected = pending.len() as u64;
    table.rows.extend(pending);
    Ok(Execution::Count(affected, generated))
}

fn create_table(
    database: &mut Database,
    name: &ObjectName,
    columns: &[ColumnDef],
    if_not_exists: bool,
) -> Result<Execution, ShardgateError> {
    let name = object_name(name);
    let simple = name.rsplit('.').next().unwrap_or(&name).to_string();
    let key = table_key(&simple);
    if database.tables.contains_key(&key) {
        if if_not_exists {
            return Ok(Execution::Count(0, Vec::new()));
        }
        return Err(ShardgateError::driver(
            1050,
            "42S01",
            format!("Table '{simple}' already exists"),
        ));
    }
    let columns = columns
        .iter()
        .map(|def| TableColumn {
            name: def.name.value.clone(),
            data_type: def.data_type.to_string(),
            auto_increment: def
                .options
                .iter()
                .any(|option| option.option.to_string().to_uppercase().contains("AUTO_INCREMENT")),
        })
        .collect();
    database.tables.insert(
        key,
        Table {
            name: simple,
            columns,
            rows: Vec::new(),
            next_id: 1,
        },
    );
    Ok(Execution::Count(0, Vec::new()))
}

/// Integer and floating columns store numbers even when the client sent text.
fn coerce(value: DataValue, data_type: &str) -> DataValue {
    let upper = data_type.to_uppercase();
    let is_integer = ["INT", "BIGINT", "SMALLINT", "TINYINT", "MEDIUMINT", "INTEGER"]
        .iter()
        .any(|t| upper.split(['(', ' ']).next() == Some(*t));
    let is_float = ["FLOAT", "DOUBLE", "REAL"]
        .iter()
        .any(|t| upper.split(['(', ' ']).next() == Some(*t));
    match value {
        DataValue::String(ref s) if is_integer => s.trim().parse().map(DataValue::Int64).unwrap_or(value),
        DataValue::Bool(b) if is_integer => DataValue::Int64(i64::from(b)),
        DataValue::String(ref s) if is_float => s.trim().parse().map(DataValue::Float64).unwrap_or(value),
        DataValue::Int64(v) if is_float => DataValue::Float64(v as f64),
        other => other,
    }
}

fn relation_name(relation: &TableFactor) -> Result<String, ShardgateError> {
    match relation {
        TableFactor::Table { name, .. } => {
            let name = object_name(name);
            Ok(name.rsplit('.').next().unwrap_or(&name).to_string())
        }
        other => Err(not_supported(&other.to_string())),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn column_index(columns: &[TableColumn], name: &str, clause: &str) -> Result<usize, ShardgateError> {
    columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| unknown_column(name, clause))
}

fn unknown_table(name: &str) -> ShardgateError {
    ShardgateError::driver(1146, "42S02", format!("Table '{name}' doesn't exist"))
}

fn unknown_column(name: &str, clause: &str) -> ShardgateError {
    ShardgateError::driver(1054, "42S22", format!("Unknown column '{name}' in '{clause}'"))
}

fn not_supported(what: &str) -> ShardgateError {
    ShardgateError::driver(
        1235,
        "42000",
        format!("This version of shardgate doesn't yet support '{what}'"),
    )
}
