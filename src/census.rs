//! Census roster parsing and validation. Nothing here touches storage.

use std::io::Read;

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::i18n::{Catalog, Message};
use crate::models::{Census, MemberRow};

pub const COLUMN_COUNT: usize = 4;
pub const MIN_AGE: i64 = 2;
pub const MAX_AGE: i64 = 120;

const SAMPLE_HEADER: &str = "Firstname,Lastname,Birthyear,Gender";
const SAMPLE_ROWS: [&str; 2] = ["Jane,Doe,1990,female", "John,Smith,1985,male"];

/// Validates raw roster records for report `year`.
///
/// The first record is treated as a header, and skipped, only when its third
/// column does not parse as an integer. Line numbers in errors are 1-based
/// record positions, header included.
pub fn validate_rows<R: AsRef<str>>(records: &[Vec<R>], year: i32) -> Result<Vec<MemberRow>> {
    let Some(first) = records.first() else {
        return Err(LibError::invalid(
            "CSV file is empty",
            anyhow!("census upload without records"),
        ));
    };
    if first.len() != COLUMN_COUNT {
        return Err(LibError::invalid(
            "CSV must have exactly 4 columns: Firstname, Lastname, Birthyear, Gender",
            anyhow!("first record has {} columns", first.len()),
        ));
    }
    let start = usize::from(first[2].as_ref().trim().parse::<i64>().is_err());

    let mut members = Vec::with_capacity(records.len() - start);
    for (index, record) in records.iter().enumerate().skip(start) {
        members.push(validate_row(record, index + 1, year)?);
    }
    Ok(members)
}

fn validate_row<R: AsRef<str>>(record: &[R], line: usize, year: i32) -> Result<MemberRow> {
    if record.len() != COLUMN_COUNT {
        return Err(LibError::invalid_line(
            "line %d: expected 4 columns, got %d",
            line,
            anyhow!("record has {} columns", record.len()),
        )
        .with_arg(record.len()));
    }
    if record.iter().all(|field| field.as_ref().trim().is_empty()) {
        return Err(LibError::invalid_line(
            "line %d: blank row found",
            line,
            anyhow!("blank census record"),
        ));
    }

    let firstname = record[0].as_ref().trim();
    let lastname = record[1].as_ref().trim();
    let birth_year = record[2].as_ref().trim();
    let gender = record[3].as_ref().trim();

    check_text_fields(firstname, lastname, gender, line)?;

    let parsed: i32 = birth_year.parse().map_err(|err| {
        LibError::invalid_line(
            "line %d: invalid birth year '%s'",
            line,
            anyhow!("birth year {birth_year:?}: {err}"),
        )
        .with_arg(birth_year)
    })?;
    check_age(parsed, line, year)?;

    Ok(MemberRow {
        firstname: firstname.to_string(),
        lastname: lastname.to_string(),
        gender: gender.to_string(),
        birth_year: parsed,
    })
}

/// Applies the per-row checks of [`validate_rows`] to rows that arrive
/// already structured. Line numbers are 1-based row positions.
pub fn validate_members(members: &[MemberRow], year: i32) -> Result<()> {
    for (index, member) in members.iter().enumerate() {
        let line = index + 1;
        let firstname = member.firstname.trim();
        let lastname = member.lastname.trim();
        let gender = member.gender.trim();
        if firstname.is_empty() && lastname.is_empty() && gender.is_empty() {
            return Err(LibError::invalid_line(
                "line %d: blank row found",
                line,
                anyhow!("blank census member"),
            ));
        }
        check_text_fields(firstname, lastname, gender, line)?;
        check_age(member.birth_year, line, year)?;
    }
    Ok(())
}

fn check_text_fields(firstname: &str, lastname: &str, gender: &str, line: usize) -> Result<()> {
    if is_numeric(firstname) {
        return Err(numeric_field("line %d: Firstname contains only numbers", line));
    }
    if is_numeric(lastname) {
        return Err(numeric_field("line %d: Lastname contains only numbers", line));
    }
    if is_numeric(gender) {
        return Err(numeric_field("line %d: Gender contains only numbers", line));
    }
    Ok(())
}

fn check_age(birth_year: i32, line: usize, year: i32) -> Result<()> {
    let age = i64::from(year) - i64::from(birth_year);
    if age < MIN_AGE {
        return Err(LibError::invalid_line(
            "line %d: age %d is too young (minimum 2 years)",
            line,
            anyhow!("birth year {birth_year} in report year {year}"),
        )
        .with_arg(age));
    }
    if age > MAX_AGE {
        return Err(LibError::invalid_line(
            "line %d: age %d is too old (maximum 120 years)",
            line,
            anyhow!("birth year {birth_year} in report year {year}"),
        )
        .with_arg(age));
    }
    Ok(())
}

fn numeric_field(public: &'static str, line: usize) -> LibError {
    LibError::invalid_line(public, line, anyhow!("numeric-only text field"))
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

/// Reads a comma separated roster and validates it for `year`.
pub fn parse_csv<R: Read>(reader: R, year: i32) -> Result<Census> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|err| {
            LibError::invalid("failed to read CSV: %w", anyhow!(err.to_string()))
                .with_arg(Message::new(err.to_string()))
        })?;
        records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let members = validate_rows(&records, year)?;
    Ok(Census::new(year, members))
}

/// A downloadable example roster with a header translated into `lang`.
pub fn sample_csv(catalog: &Catalog, lang: &str) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for line in std::iter::once(SAMPLE_HEADER).chain(SAMPLE_ROWS) {
        let translated = catalog.translate(&Message::new(line), lang);
        writer
            .write_record(translated.split(','))
            .map_err(|err| LibError::unknown("could not write sample CSV", anyhow!(err)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| LibError::unknown("could not write sample CSV", anyhow!(err.to_string())))?;
    String::from_utf8(bytes)
        .map_err(|err| LibError::unknown("could not write sample CSV", anyhow!(err)))
}
