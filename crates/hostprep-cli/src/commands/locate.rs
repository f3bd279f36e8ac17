use super::{json_pretty, LoadedPlan, EXIT_SUCCESS};
use console::Style;
use hostprep_core::{Engine, FallbackTarget, Located};

pub fn run(loaded: &LoadedPlan, service: &str, directive: &str, json: bool) -> Result<u8, String> {
    let engine = Engine::system(&loaded.plan);
    let located = engine
        .locate(&loaded.plan, service, directive)
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "located": located,
            "effective_value": located.effective_value(),
            "consistent": located.consistent_value().is_some(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_located(&located);
    }
    Ok(EXIT_SUCCESS)
}

fn print_located(located: &Located) {
    println!("{} for service {}\n", located.directive, located.service);
    if located.sources.is_empty() {
        println!("  no configuration sources exist");
    }
    for s in &located.sources {
        let path = s.source.path.display();
        if s.declarations.is_empty() {
            let dim = Style::new().dim();
            println!("  {}. {path} ({:?}) {}", s.source.rank, s.source.kind, dim.apply_to("-"));
            continue;
        }
        for d in &s.declarations {
            println!(
                "  {}. {path}:{} ({:?}) {}",
                s.source.rank, d.line, s.source.kind, d.value
            );
        }
    }
    println!();
    println!("{}", summary(located));
}

fn summary(located: &Located) -> String {
    if located.is_absent() {
        return match &located.fallback {
            FallbackTarget::IncludeFile(p) => {
                format!("not declared; would be written to {}", p.display())
            }
            FallbackTarget::AppendPrimary(p) => {
                format!("not declared; would be appended to {}", p.display())
            }
        };
    }
    match (located.effective_value(), located.consistent_value()) {
        (_, Some(v)) => format!("effective value: {v}"),
        (Some(v), None) => format!("effective value: {v} (sources disagree)"),
        (None, None) => "not declared".to_owned(),
    }
}
