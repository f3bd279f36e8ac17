use super::{json_pretty, LoadedPlan, EXIT_SUCCESS};
use hostprep_core::Engine;

pub fn run(loaded: &LoadedPlan, json: bool) -> Result<u8, String> {
    let engine = Engine::system(&loaded.plan);
    let listings = engine.backups(&loaded.plan).map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&listings)?);
    } else if listings.is_empty() {
        println!("no backups found");
    } else {
        for listing in &listings {
            println!("{}", listing.source.display());
            for backup in &listing.backups {
                println!("  {}", backup.display());
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
