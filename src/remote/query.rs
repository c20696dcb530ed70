// ABOUTME: Builders for the bounded remote queries issued by the detector and engine
// ABOUTME: Probes return O(1) output; row pages are ascending by key and capped by LIMIT

use crate::mirror::tables::{CursorValue, MonitoredTable};
use crate::utils::quote_ident;

/// Number of rows beyond the cursor.
pub fn count_since(table: &MonitoredTable, cursor: &CursorValue) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {} > {};",
        quote_ident(table.name),
        quote_ident(table.key_column()),
        cursor.to_sql_literal()
    )
}

/// Highest key beyond the cursor (empty output when there is none).
pub fn max_key_since(table: &MonitoredTable, cursor: &CursorValue) -> String {
    format!(
        "SELECT MAX({key}) FROM {} WHERE {key} > {};",
        quote_ident(table.name),
        cursor.to_sql_literal(),
        key = quote_ident(table.key_column())
    )
}

/// One page of full rows strictly after `after`, in ascending key order.
///
/// Paging keys off the last row seen rather than an OFFSET, so rows appended
/// at the source between pages are picked up rather than shifting the window.
pub fn fetch_page(table: &MonitoredTable, after: &CursorValue, limit: usize) -> String {
    format!(
        "SELECT * FROM {} WHERE {key} > {} ORDER BY {key} ASC LIMIT {};",
        quote_ident(table.name),
        after.to_sql_literal(),
        limit,
        key = quote_ident(table.key_column())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::tables::lookup;

    #[test]
    fn test_count_since_id_table() {
        let table = lookup("signals_received").unwrap();
        assert_eq!(
            count_since(table, &CursorValue::Id(1000)),
            "SELECT COUNT(*) FROM \"signals_received\" WHERE \"id\" > 1000;"
        );
    }

    #[test]
    fn test_max_key_since_date_table() {
        let table = lookup("daily_stats").unwrap();
        let cursor = CursorValue::date("2024-01-05").unwrap();
        assert_eq!(
            max_key_since(table, &cursor),
            "SELECT MAX(\"date\") FROM \"daily_stats\" WHERE \"date\" > '2024-01-05';"
        );
    }

    #[test]
    fn test_fetch_page_is_ordered_and_bounded() {
        let table = lookup("orders_executed").unwrap();
        assert_eq!(
            fetch_page(table, &CursorValue::Id(0), 500),
            "SELECT * FROM \"orders_executed\" WHERE \"id\" > 0 ORDER BY \"id\" ASC LIMIT 500;"
        );
    }
}
