use shardgate_core::error::ShardgateError;
use shardgate_core::types::{DataValue, QueryResult, Row, RowStream};
use std::cmp::Ordering;

/// Combines the row streams of several shards into one.
pub trait ResultMergeStrategy: Send + Sync {
    fn merge(&self, results: Vec<QueryResult>) -> Result<RowStream, ShardgateError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub ascending: bool,
}

/// What the router knows about how rows from different shards combine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSpec {
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    /// Rows dropped from the front of the merged stream. Each shard must
    /// have been asked for at least `offset + limit` rows.
    pub offset: u64,
}

pub fn merge_strategy_for(spec: &MergeSpec) -> Box<dyn ResultMergeStrategy> {
    let base: Box<dyn ResultMergeStrategy> = if spec.order_by.is_empty() {
        Box::new(ConcatMergeStrategy)
    } else {
        Box::new(OrderedMergeStrategy::new(spec.order_by.clone()))
    };
    if spec.limit.is_none() && spec.offset == 0 {
        return base;
    }
    Box::new(PaginatedMergeStrategy {
        inner: base,
        offset: spec.offset,
        limit: spec.limit,
    })
}

/// Rows of result 0, then result 1, and so on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatMergeStrategy;

impl ResultMergeStrategy for ConcatMergeStrategy {
    fn merge(&self, results: Vec<QueryResult>) -> Result<RowStream, ShardgateError> {
        Ok(Box::new(results.into_iter().flat_map(|result| result.rows)))
    }
}

/// k-way merge of shard streams that are each sorted by `keys`.
/// Equal rows keep unit order.
#[derive(Debug, Clone)]
pub struct OrderedMergeStrategy {
    keys: Vec<OrderKey>,
}

impl OrderedMergeStrategy {
    pub fn new(keys: Vec<OrderKey>) -> Self {
        Self { keys }
    }
}

impl ResultMergeStrategy for OrderedMergeStrategy {
    fn merge(&self, results: Vec<QueryResult>) -> Result<RowStream, ShardgateError> {
        let columns = match results.first() {
            Some(first) => &first.columns,
            None => return Ok(Box::new(std::iter::empty())),
        };
        let mut keys = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let index = columns
                .iter()
                .position(|c| c.label.eq_ignore_ascii_case(&key.column))
                .or_else(|| {
                    columns
                        .iter()
                        .position(|c| c.name.eq_ignore_ascii_case(&key.column))
                })
                .ok_or_else(|| {
                    ShardgateError::MergeStrategy(format!(
                        "order by column {} is not in the result",
                        key.column
                    ))
                })?;
            keys.push((index, key.ascending));
        }
        let sources = results.into_iter().map(|result| result.rows).collect();
        Ok(Box::new(SortedRowStream::new(sources, keys)))
    }
}

struct PaginatedMergeStrategy {
    inner: Box<dyn ResultMergeStrategy>,
    offset: u64,
    limit: Option<u64>,
}

impl ResultMergeStrategy for PaginatedMergeStrategy {
    fn merge(&self, results: Vec<QueryResult>) -> Result<RowStream, ShardgateError> {
        Ok(Box::new(PaginatedRows {
            rows: self.inner.merge(results)?,
            skip: self.offset,
            remaining: self.limit,
        }))
    }
}

/// Skips then takes rows, counting only rows. An error is passed on even
/// when it arrives inside the skipped range.
struct PaginatedRows {
    rows: RowStream,
    skip: u64,
    remaining: Option<u64>,
}

impl Iterator for PaginatedRows {
    type Item = Result<Row, ShardgateError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.skip > 0 {
            match self.rows.next()? {
                Ok(_) => self.skip -= 1,
                Err(err) => {
                    self.skip = 0;
                    self.remaining = Some(0);
                    return Some(Err(err));
                }
            }
        }
        if self.remaining == Some(0) {
            return None;
        }
        let item = self.rows.next()?;
        match (&item, self.remaining.as_mut()) {
            (Ok(_), Some(remaining)) => *remaining -= 1,
            (Err(_), _) => self.remaining = Some(0),
            _ => {}
        }
        Some(item)
    }
}

struct SortedRowStream {
    sources: Vec<RowStream>,
    heads: Vec<Option<Row>>,
    keys: Vec<(usize, bool)>,
    primed: bool,
    pending_error: Option<ShardgateError>,
    done: bool,
}

impl SortedRowStream {
    fn new(sources: Vec<RowStream>, keys: Vec<(usize, bool)>) -> Self {
        let heads = sources.iter().map(|_| None).collect();
        Self {
            sources,
            heads,
            keys,
            primed: false,
            pending_error: None,
            done: false,
        }
    }

    fn pull(&mut self, index: usize) -> Result<(), ShardgateError> {
        self.heads[index] = self.sources[index].next().transpose()?;
        Ok(())
    }

    fn fail(&mut self, err: ShardgateError) -> Option<Result<Row, ShardgateError>> {
        self.done = true;
        self.sources.clear();
        self.heads.clear();
        Some(Err(err))
    }

    fn compare(&self, left: &Row, right: &Row) -> Ordering {
        for (index, ascending) in &self.keys {
            let ordering = compare_values(left.get(*index), right.get(*index));
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Iterator for SortedRowStream {
    type Item = Result<Row, ShardgateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            return self.fail(err);
        }
        if !self.primed {
            self.primed = true;
            for index in 0..self.sources.len() {
                if let Err(err) = self.pull(index) {
                    return self.fail(err);
                }
            }
        }
        let mut best: Option<usize> = None;
        for (index, head) in self.heads.iter().enumerate() {
            let Some(row) = head else { continue };
            best = match best {
                Some(current) => match self.heads[current].as_ref() {
                    Some(best_row) if self.compare(row, best_row) == Ordering::Less => Some(index),
                    _ => Some(current),
                },
                None => Some(index),
            };
        }
        let Some(index) = best else {
            self.done = true;
            return None;
        };
        let row = self.heads[index].take()?;
        if let Err(err) = self.pull(index) {
            self.pending_error = Some(err);
        }
        Some(Ok(row))
    }
}

/// NULL sorts first; numbers compare numerically across integer and float.
pub fn compare_values(left: Option<&DataValue>, right: Option<&DataValue>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => compare_data(l, r),
    }
}

fn compare_data(left: &DataValue, right: &DataValue) -> Ordering {
    match (left, right) {
        (DataValue::Null, DataValue::Null) => Ordering::Equal,
        (DataValue::Null, _) => Ordering::Less,
        (_, DataValue::Null) => Ordering::Greater,
        (DataValue::Int64(l), DataValue::Int64(r)) => l.cmp(r),
        (DataValue::Int64(l), DataValue::Float64(r)) => {
            (*l as f64).partial_cmp(r).unwrap_or(Ordering::Equal)
        }
        (DataValue::Float64(l), DataValue::Int64(r)) => {
            l.partial_cmp(&(*r as f64)).unwrap_or(Ordering::Equal)
        }
        (DataValue::Float64(l), DataValue::Float64(r)) => {
            l.partial_cmp(r).unwrap_or(Ordering::Equal)
        }
        (DataValue::Bool(l), DataValue::Bool(r)) => l.cmp(r),
        (DataValue::String(l), DataValue::String(r)) => l.cmp(r),
        (DataValue::Bytes(l), DataValue::Bytes(r)) => l.cmp(r),
        (l, r) => l.to_text().cmp(&r.to_text()),
    }
}
