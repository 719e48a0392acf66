use admissions_analysis::{
    header, percentage,
    report::{admissions_by_month, admissions_by_year, count_by, mean_stay_days_by, top_n},
    Admissions,
};
use clap::Parser;
use qu::ick_use::*;
use term_data_table::{Cell, Row, Table};

#[derive(Parser)]
struct Opt {
    /// How many rows to show in the top-N tables.
    #[clap(long, default_value_t = 10)]
    top: usize,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let admissions = Admissions::load("admissions_clean.bin")?;
    let total = admissions.len();

    header("Data stats");
    println!("total admissions: {}", total);
    if let Some(date) = admissions.earliest_admission_date() {
        println!("earliest admission: {}", date);
    }
    if let Some(date) = admissions.latest_admission_date() {
        println!("latest admission: {}", date);
    }

    header("Genders");
    let mut table = count_table("Gender");
    for (label, count) in admissions.count_genders() {
        add_count_row(&mut table, label.to_string(), count, total);
    }
    println!("{}", table);

    header("Admission types");
    let mut table = count_table("Admission type");
    for (label, count) in admissions.count_admission_types() {
        add_count_row(&mut table, label.to_string(), count, total);
    }
    println!("{}", table);

    header("Medical conditions");
    let mut table = count_table("Condition");
    let conditions = count_by(&admissions, |adm| adm.medical_condition.clone());
    for (label, count) in top_n(&conditions, opt.top) {
        add_count_row(&mut table, label.to_string(), count, total);
    }
    println!("{}", table);

    header("Busiest hospitals");
    let mut table = count_table("Hospital");
    let hospitals = count_by(&admissions, |adm| adm.hospital.clone());
    for (label, count) in top_n(&hospitals, opt.top) {
        add_count_row(&mut table, label.to_string(), count, total);
    }
    println!("{}", table);

    header("Busiest doctors");
    let mut table = count_table("Doctor");
    let doctors = count_by(&admissions, |adm| adm.doctor.clone());
    for (label, count) in top_n(&doctors, opt.top) {
        add_count_row(&mut table, label.to_string(), count, total);
    }
    println!("{}", table);

    header("Average stay by condition");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Condition"))
            .with_cell(Cell::from("Mean stay (days)")),
    );
    for (label, days) in mean_stay_days_by(&admissions, |adm| adm.medical_condition.clone()) {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label.to_string()))
                .with_cell(Cell::from(format!("{:.1}", days))),
        );
    }
    println!("{}", table);

    header("Admissions by year");
    let mut table = count_table("Year");
    for (year, count) in admissions_by_year(&admissions) {
        add_count_row(&mut table, year.to_string(), count, total);
    }
    println!("{}", table);

    header("Admissions by month");
    let mut table = count_table("Month");
    for ((year, month), count) in admissions_by_month(&admissions) {
        add_count_row(&mut table, format!("{}-{:02}", year, month), count, total);
    }
    println!("{}", table);

    Ok(())
}

fn count_table(label: &'static str) -> Table<'static> {
    Table::new().with_row(
        Row::new()
            .with_cell(Cell::from(label))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    )
}

fn add_count_row(table: &mut Table<'_>, label: String, count: usize, total: usize) {
    table.add_row(
        Row::new()
            .with_cell(Cell::from(label))
            .with_cell(Cell::from(count.to_string()))
            .with_cell(Cell::from(percentage(count, total))),
    );
}
