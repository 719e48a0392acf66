use admissions_analysis::Admissions;
use qu::ick_use::*;

#[qu::ick]
fn main() -> Result {
    let admissions = Admissions::load_orig("admissions.csv")?;
    println!("imported {} admission records", admissions.len());
    admissions.save("admissions.bin")?;
    Ok(())
}
