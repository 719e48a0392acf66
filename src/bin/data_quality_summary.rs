use admissions_analysis::{clean::CleanSummary, header, percentage, Admissions};
use itertools::Itertools;
use qu::ick_use::*;
use term_data_table::{Cell, Row, Table};

#[qu::ick]
pub fn main() -> Result {
    let summary = CleanSummary::load("clean_summary.json")?;
    let admissions = Admissions::load("admissions_clean.bin")?;

    header("Cleaning run");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Stage"))
            .with_cell(Cell::from("Records removed")),
    );
    table.add_row(
        Row::new()
            .with_cell(Cell::from("exact duplicate elimination"))
            .with_cell(Cell::from(summary.exact_duplicates_removed.to_string())),
    );
    table.add_row(
        Row::new()
            .with_cell(Cell::from("age-variance resolution"))
            .with_cell(Cell::from(summary.age_conflicts_removed.to_string())),
    );
    println!("{}", table);
    println!(
        "{} of {} records survived ({})",
        summary.final_records,
        summary.initial_records,
        percentage(summary.final_records, summary.initial_records)
    );

    header("Identity");
    println!("distinct patients: {}", summary.patients);
    println!("distinct visits: {}", summary.visits);
    println!(
        "age-window divergent identity triples: {}",
        summary.window_divergent_triples
    );
    if summary.window_divergent_triples > 0 {
        println!(
            "(identity grouping anchors each (name, blood type, age) to the \
             lowest-sorted age within 6 years; the divergent triples sit in \
             chained windows a transitive grouping would have merged)"
        );
    }

    header("Snapshot checks");
    let with_patient_id = admissions
        .iter_ref()
        .filter(|adm| adm.patient_id.is_some())
        .count();
    let with_visit_id = admissions
        .iter_ref()
        .filter(|adm| adm.visit_id.is_some())
        .count();
    println!(
        "records with a patient id: {} / {}",
        with_patient_id,
        admissions.len()
    );
    println!(
        "records with a visit id: {} / {}",
        with_visit_id,
        admissions.len()
    );
    let distinct_patients = admissions
        .iter_ref()
        .filter_map(|adm| adm.patient_id)
        .unique()
        .count();
    println!("distinct patient ids in snapshot: {}", distinct_patients);
    if let (Some(first), Some(last)) = (
        admissions.earliest_admission_date(),
        admissions.latest_admission_date(),
    ) {
        println!("admission dates span {} to {}", first, last);
    }
    Ok(())
}
