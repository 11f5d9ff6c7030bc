use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use club_graph::census::{parse_csv, validate_rows};

const FIRST_NAMES: [&str; 6] = ["Erika", "Max", "Lea", "Jonas", "Mia", "Paul"];
const LAST_NAMES: [&str; 4] = ["Mustermann", "Schmidt", "Weber", "Becker"];
const GENDERS: [&str; 3] = ["w", "m", "d"];

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn synthetic_roster(rows: usize) -> Vec<Vec<String>> {
    let mut state = 0x5eed_c0ff_ee00_0001u64;
    let mut records = Vec::with_capacity(rows + 1);
    records.push(
        ["Vorname", "Nachname", "Geburtsjahr", "Geschlecht"]
            .iter()
            .map(|field| field.to_string())
            .collect(),
    );
    for _ in 0..rows {
        let first = FIRST_NAMES[(lcg_next(&mut state) as usize) % FIRST_NAMES.len()];
        let last = LAST_NAMES[(lcg_next(&mut state) as usize) % LAST_NAMES.len()];
        let gender = GENDERS[(lcg_next(&mut state) as usize) % GENDERS.len()];
        let birth_year = 1910 + (lcg_next(&mut state) % 110) as i32;
        records.push(vec![
            first.to_string(),
            last.to_string(),
            birth_year.to_string(),
            gender.to_string(),
        ]);
    }
    records
}

fn to_csv(records: &[Vec<String>]) -> String {
    records
        .iter()
        .map(|record| record.join(","))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_validate_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_rows");
    for rows in [100usize, 1_000, 10_000] {
        let records = synthetic_roster(rows);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &records, |b, records| {
            b.iter(|| black_box(validate_rows(records, 2024)));
        });
    }
    group.finish();
}

fn bench_parse_csv(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_csv");
    for rows in [100usize, 1_000, 10_000] {
        let input = to_csv(&synthetic_roster(rows));
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &input, |b, input| {
            b.iter(|| black_box(parse_csv(input.as_bytes(), 2024)));
        });
    }
    group.finish();
}

criterion_group!(census_validation, bench_validate_rows, bench_parse_csv);
criterion_main!(census_validation);
