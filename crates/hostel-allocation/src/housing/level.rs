//! Academic level derivation from admission years and matric numbers.

use chrono::{DateTime, Datelike, Utc};

use super::domain::AcademicLevel;

/// Month in which students advance to the next academic year.
const PROGRESSION_MONTH: u32 = 11;
const EARLIEST_ADMISSION_YEAR: i32 = 2010;

/// Current level for a student admitted in `admission_year`, evaluated at `now`.
pub fn academic_level(admission_year: i32, now: DateTime<Utc>) -> AcademicLevel {
    let academic_year = if now.month() < PROGRESSION_MONTH {
        now.year() - 1
    } else {
        now.year()
    };

    match academic_year - admission_year {
        1 => AcademicLevel::Year2,
        2 => AcademicLevel::Year3,
        3 => AcademicLevel::Year4,
        years if years >= 4 => AcademicLevel::Year5,
        _ => AcademicLevel::Year1,
    }
}

/// Extract the admission year from `U2021/5570004`, `U20215570004` or `2021/...` style numbers.
pub fn admission_year_from_matric(matric_no: &str, now: DateTime<Utc>) -> Option<i32> {
    let cleaned = matric_no.trim().to_ascii_uppercase();
    let digits = cleaned.strip_prefix('U').unwrap_or(&cleaned);

    let year_str = digits.get(..4)?;
    if !year_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = year_str.parse().ok()?;
    (EARLIEST_ADMISSION_YEAR..=now.year() + 1)
        .contains(&year)
        .then_some(year)
}
