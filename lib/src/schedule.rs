use chrono::NaiveDate;

use crate::error;

/// Row 1 holds the headers, so the anchor date lands on row 2.
const FIRST_DATA_ROW: i64 = 2;

/// The 1-based spreadsheet row that `today` is recorded in.
///
/// Runs on the same day map to the same row, so a rerun overwrites
/// rather than appends.
pub fn row_for(
    today: NaiveDate,
    anchor: NaiveDate,
) -> Result<u32, error::Schedule> {
    let days = (today - anchor).num_days();
    if days < 0 {
        return Err(error::Schedule::BeforeAnchor { today, anchor });
    }
    // NaiveDate's whole range spans fewer days than u32::MAX
    Ok((days + FIRST_DATA_ROW) as u32)
}

/// The text written into the Date column, e.g. `22APR2025`.
pub fn date_label(date: NaiveDate) -> String {
    date.format("%d%b%Y").to_string().to_uppercase()
}
