//! netperf log parsing.
//!
//! The netperf orchestrator prints a CSV block that starts at the `MSS` header and
//! ends two characters before the `Test concluded` line. Each data row is keyed by
//! its first column; columns 0 and 1 are descriptive, and the trailing columns carry
//! no measurement.

use std::collections::BTreeMap;

use crate::crds::ResultTable;

/// Marker at the start of the CSV header
pub const BEGIN_MARKER: &str = "MSS";

/// Marker printed once the orchestrator has finished every iteration
pub const END_MARKER: &str = "Test concluded";

/// Line break characters between the last data row and the end marker
const TRAILER_LEN: usize = 2;

/// First metric column
const FIRST_METRIC_COLUMN: usize = 2;

/// Columns dropped from the end of every row
const TRAILING_NON_METRIC_COLUMNS: usize = 2;

/// Extract the bandwidth table from raw worker output.
///
/// Returns `None` while either marker is missing or the block between them is
/// empty, meaning the results are not available yet.
#[must_use]
pub fn parse(raw: &str) -> Option<ResultTable> {
    let region = result_region(raw)?;

    let mut lines = region.lines();
    let mut header_line = lines.next()?;
    if header_line.trim() == BEGIN_MARKER {
        header_line = lines.next()?;
    }
    let headers: Vec<&str> = header_line.split(',').map(str::trim).collect();

    let mut table = ResultTable::new();
    for line in lines.filter(|line| !line.trim().is_empty()) {
        let values: Vec<&str> = line.split(',').map(str::trim).collect();
        let key = values[0];

        let n = headers.len().min(values.len());
        let columns: BTreeMap<String, String> = (FIRST_METRIC_COLUMN
            ..n.saturating_sub(TRAILING_NON_METRIC_COLUMNS))
            .map(|i| (headers[i].to_string(), values[i].to_string()))
            .collect();

        table.insert_row(key, columns);
    }

    Some(table)
}

fn result_region(raw: &str) -> Option<&str> {
    let begin = raw.find(BEGIN_MARKER)?;
    let end = raw.find(END_MARKER)?;

    let mut stop = end.checked_sub(TRAILER_LEN)?;
    while !raw.is_char_boundary(stop) {
        stop -= 1;
    }
    if stop <= begin {
        return None;
    }

    Some(&raw[begin..stop])
}
