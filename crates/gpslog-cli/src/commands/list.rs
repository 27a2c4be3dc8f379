//! List command: query the stored locations.

use std::path::Path;

use anyhow::{Result, bail};

use gpslog_store::{LocationQuery, LocationStore};

use crate::cli::{ListArgs, OutputFormat};
use crate::format::{format_records_csv, format_records_json, format_records_text};
use crate::util::{open_store, parse_datetime, write_output};

/// Build the store query for the given arguments.
pub fn build_query(args: &ListArgs) -> Result<LocationQuery> {
    let mut query = LocationQuery::new();
    if let Some(since) = &args.since {
        query = query.since(parse_datetime(since)?);
    }
    if let Some(until) = &args.until {
        query = query.until(parse_datetime(until)?);
    }
    if let (Some(since), Some(until)) = (query.since, query.until)
        && since > until
    {
        bail!("--since must not be later than --until");
    }
    if args.count > 0 {
        query = query.limit(args.count);
    }
    if args.newest_first {
        query = query.newest_first();
    }
    Ok(query)
}

pub async fn cmd_list(args: ListArgs, db_path: &Path, output: Option<&Path>) -> Result<()> {
    let query = build_query(&args)?;
    let store = open_store(db_path)?;
    let records = store.query(&query).await?;

    let content = match args.format {
        OutputFormat::Text => format_records_text(&records)?,
        OutputFormat::Json => format_records_json(&records)?,
        OutputFormat::Csv => format_records_csv(&records, args.no_header),
    };
    write_output(output, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn args() -> ListArgs {
        ListArgs {
            format: OutputFormat::Text,
            count: 0,
            since: None,
            until: None,
            newest_first: false,
            no_header: false,
        }
    }

    #[test]
    fn test_default_query_lists_everything() {
        assert_eq!(build_query(&args()).unwrap(), LocationQuery::new());
    }

    #[test]
    fn test_query_from_args() {
        let query = build_query(&ListArgs {
            count: 5,
            since: Some("2024-05-01".to_string()),
            newest_first: true,
            ..args()
        })
        .unwrap();
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.since, Some(datetime!(2024-05-01 0:00 UTC)));
        assert!(query.newest_first);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let result = build_query(&ListArgs {
            since: Some("2024-05-02".to_string()),
            until: Some("2024-05-01".to_string()),
            ..args()
        });
        assert!(result.is_err());
    }
}
