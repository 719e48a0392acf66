use admissions_analysis::{
    fmt_money, header,
    report::{billing_by, BillingStats},
    Admission, Admissions, ArcStr,
};
use qu::ick_use::*;
use std::collections::BTreeMap;
use term_data_table::{Cell, Row, Table};

#[qu::ick]
pub fn main() -> Result {
    let admissions = Admissions::load("admissions_clean.bin")?;

    header("Billing by insurance provider");
    print_billing(billing_by(&admissions, |adm: &Admission| {
        adm.insurance_provider.clone()
    }));

    header("Billing by medical condition");
    print_billing(billing_by(&admissions, |adm: &Admission| {
        adm.medical_condition.clone()
    }));

    header("Billing by hospital");
    print_billing(billing_by(&admissions, |adm: &Admission| {
        adm.hospital.clone()
    }));

    Ok(())
}

fn print_billing(stats: BTreeMap<ArcStr, BillingStats>) {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Group"))
            .with_cell(Cell::from("Admissions"))
            .with_cell(Cell::from("Total billed"))
            .with_cell(Cell::from("Mean"))
            .with_cell(Cell::from("Min"))
            .with_cell(Cell::from("Max")),
    );
    for (label, stats) in stats {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label.to_string()))
                .with_cell(Cell::from(stats.count.to_string()))
                .with_cell(Cell::from(fmt_money(stats.total)))
                .with_cell(Cell::from(fmt_money(stats.mean())))
                .with_cell(Cell::from(fmt_money(stats.min)))
                .with_cell(Cell::from(fmt_money(stats.max))),
        );
    }
    println!("{}", table);
}
