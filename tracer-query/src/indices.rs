//! Daily index shard selection.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// `prod` becomes `prod:`, an empty prefix stays empty
pub fn index_prefix(configured: &str) -> String {
    if configured.is_empty() {
        String::new()
    } else {
        format!("{configured}:")
    }
}

fn index_with_date(index_prefix: &str, date: NaiveDate) -> String {
    format!("{}{}", index_prefix, date.format("%Y-%m-%d"))
}

/// Every daily shard overlapping `[start, end]`, newest first.
///
/// `index_prefix` is the full name prefix including the logical index, e.g.
/// `prod:jaeger-span-`. Never empty: when `end` is before `start` only the
/// shard of `start` is returned.
pub fn indices_for_time_range(
    index_prefix: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<String> {
    let start_day = start.date_naive();
    let mut day = end.date_naive();
    let mut indices = vec![];
    while day > start_day {
        indices.push(index_with_date(index_prefix, day));
        day -= Duration::days(1);
    }
    indices.push(index_with_date(index_prefix, start_day));
    indices
}

#[cfg(test)]
mod test {
    use super::{index_prefix, indices_for_time_range};
    use chrono::{TimeZone, Utc};

    #[test]
    fn same_day_is_one_shard() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 1, 23, 59, 59).unwrap();
        assert_eq!(
            indices_for_time_range("jaeger-span-", start, end),
            vec!["jaeger-span-2020-01-01"]
        );
    }

    #[test]
    fn newest_first_across_month_boundary() {
        let start = Utc.with_ymd_and_hms(2020, 1, 30, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 2, 2, 1, 0, 0).unwrap();
        assert_eq!(
            indices_for_time_range("jaeger-span-", start, end),
            vec![
                "jaeger-span-2020-02-02",
                "jaeger-span-2020-02-01",
                "jaeger-span-2020-01-31",
                "jaeger-span-2020-01-30",
            ]
        );
    }

    #[test]
    fn end_before_start_keeps_start_shard() {
        let start = Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            indices_for_time_range("jaeger-span-", start, end),
            vec!["jaeger-span-2020-01-03"]
        );
    }

    #[test]
    fn prefix_is_joined_with_colon() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let prefix = format!("{}jaeger-service-", index_prefix("prod"));
        assert_eq!(
            indices_for_time_range(&prefix, start, start),
            vec!["prod:jaeger-service-2020-01-01"]
        );
        assert_eq!(index_prefix(""), "");
    }
}
