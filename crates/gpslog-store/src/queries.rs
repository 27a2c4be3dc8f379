//! Query builder for stored locations.
//!
//! # Example
//!
//! ```
//! use gpslog_store::LocationQuery;
//! use time::{Duration, OffsetDateTime};
//!
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! // The fifty most recent points of the last day
//! let query = LocationQuery::new()
//!     .since(yesterday)
//!     .newest_first()
//!     .limit(50);
//! ```

use time::OffsetDateTime;

use gpslog_types::LocationRecord;

/// Fluent query builder for committed records.
///
/// By default, queries return every record ordered by `created_at`
/// ascending (oldest first), which is the order the views display.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LocationQuery {
    /// Include only records created at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only records created at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Number of results to skip.
    pub offset: Option<u32>,
    /// Order by `created_at` descending.
    pub newest_first: bool,
}

impl LocationQuery {
    /// Create a query matching every record, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter to records created at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to records created at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Return the most recent records first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Whether a record passes the time filters.
    pub fn matches(&self, record: &LocationRecord) -> bool {
        self.since.is_none_or(|since| record.created_at >= since)
            && self.until.is_none_or(|until| record.created_at <= until)
    }

    /// Filter, order and paginate records already in display order.
    pub(crate) fn apply(&self, records: Vec<LocationRecord>) -> Vec<LocationRecord> {
        let mut matched: Vec<LocationRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        if self.newest_first {
            matched.reverse();
        }

        let offset = self.offset.unwrap_or(0) as usize;
        let limit = self.limit.map_or(usize::MAX, |l| l as usize);
        matched.into_iter().skip(offset).take(limit).collect()
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(since) = self.since {
            conditions.push("created_at >= ?");
            params.push(Box::new(crate::sqlite::to_nanos(since)));
        }

        if let Some(until) = self.until {
            conditions.push("created_at <= ?");
            params.push(Box::new(crate::sqlite::to_nanos(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT seq, id, latitude, longitude, created_at, submission \
             FROM locations {} ORDER BY created_at {order}, seq {order}",
            where_clause
        );

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpslog_types::RecordId;
    use time::macros::datetime;

    fn record(seq: u64, at: OffsetDateTime) -> LocationRecord {
        LocationRecord {
            id: Some(RecordId::new(format!("r{seq}"))),
            latitude: 0.0,
            longitude: 0.0,
            created_at: at,
            sequence: Some(seq),
            submission: None,
        }
    }

    #[test]
    fn test_default_query_sql() {
        let sql = LocationQuery::new().build_sql();
        assert!(sql.contains("ORDER BY created_at ASC, seq ASC"));
        assert!(!sql.contains("WHERE"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_offset_without_limit_sql() {
        let sql = LocationQuery::new().offset(10).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 10"));
    }

    #[test]
    fn test_where_clause_params() {
        let query = LocationQuery::new()
            .since(datetime!(2024-01-01 00:00 UTC))
            .until(datetime!(2024-01-02 00:00 UTC));
        let (clause, params) = query.build_where();
        assert_eq!(clause, "WHERE created_at >= ? AND created_at <= ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_apply_filters_and_paginates() {
        let records = vec![
            record(1, datetime!(2024-01-01 08:00 UTC)),
            record(2, datetime!(2024-01-01 09:00 UTC)),
            record(3, datetime!(2024-01-01 10:00 UTC)),
            record(4, datetime!(2024-01-01 11:00 UTC)),
        ];

        let out = LocationQuery::new()
            .since(datetime!(2024-01-01 09:00 UTC))
            .newest_first()
            .limit(2)
            .apply(records);

        let seqs: Vec<_> = out.iter().filter_map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![4, 3]);
    }
}
