use admissions_analysis::{
    header,
    report::{readmissions, READMISSION_WINDOW_DAYS},
    Admissions,
};
use clap::Parser;
use itertools::Itertools;
use qu::ick_use::*;
use term_data_table::{Cell, Row, Table};

#[derive(Parser)]
struct Opt {
    /// Largest gap between admissions, in days, that counts as a readmission.
    #[clap(long, default_value_t = READMISSION_WINDOW_DAYS)]
    max_gap_days: i64,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let admissions = Admissions::load("admissions_clean.bin")?;
    let found = readmissions(&admissions, opt.max_gap_days);

    header("Readmissions");
    println!(
        "admissions within {} days of the previous admission: {}",
        opt.max_gap_days,
        found.len()
    );
    println!(
        "patients (by name) readmitted at least once: {}",
        found.iter().map(|r| &r.name).unique().count()
    );

    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Name"))
            .with_cell(Cell::from("Admitted"))
            .with_cell(Cell::from("Readmitted"))
            .with_cell(Cell::from("Gap (days)")),
    );
    for readmission in &found {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(readmission.name.to_string()))
                .with_cell(Cell::from(readmission.first_admission.to_string()))
                .with_cell(Cell::from(readmission.next_admission.to_string()))
                .with_cell(Cell::from(readmission.gap_days.to_string())),
        );
    }
    println!("{}", table);
    Ok(())
}
