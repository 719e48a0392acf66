use admissions_analysis::{clean, header, Admissions};
use clap::Parser;
use qu::ick_use::*;

#[derive(Parser)]
struct Opt {
    /// Load the original CSV directly instead of the imported snapshot.
    #[clap(long)]
    from_csv: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let mut admissions = if opt.from_csv {
        Admissions::load_orig("admissions.csv")?
    } else {
        Admissions::load("admissions.bin")?
    };

    header("Before cleaning");
    println!("total admissions: {}", admissions.len());

    let summary = clean::run(&mut admissions);

    header("After cleaning");
    println!("exact duplicates removed: {}", summary.exact_duplicates_removed);
    println!("age conflicts resolved: {}", summary.age_conflicts_removed);
    println!("total admissions: {}", summary.final_records);
    println!("distinct patients: {}", summary.patients);
    println!("distinct visits: {}", summary.visits);
    if summary.window_divergent_triples > 0 {
        println!(
            "age-window divergent identity triples: {} (see data_quality_summary)",
            summary.window_divergent_triples
        );
    }

    // write out clean data; nothing is saved unless every stage succeeded
    admissions.save("admissions_clean.bin")?;
    summary.save("clean_summary.json")?;
    Ok(())
}
