use super::{json_pretty, LoadedPlan, EXIT_SUCCESS};
use console::Style;
use hostprep_core::{build_steps, resolve_account, Engine, StepPreview};

/// Probe every step and report which would apply. Nothing is changed.
pub fn run(loaded: &LoadedPlan, json: bool) -> Result<u8, String> {
    let account = resolve_account(&loaded.plan);
    let steps = build_steps(&loaded.plan, account.as_deref()).map_err(|e| e.to_string())?;
    let engine = Engine::system(&loaded.plan);
    let previews = engine.preview(&steps);

    if json {
        let payload = serde_json::json!({
            "plan": loaded.source,
            "pending": pending_count(&previews),
            "steps": previews,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("plan: {}\n", loaded.source);
        for p in &previews {
            println!("  {}", preview_line(p));
        }
        println!();
        match pending_count(&previews) {
            0 => println!("nothing to do: every capability is present"),
            n => println!("{n} of {} steps would apply", previews.len()),
        }
    }
    Ok(EXIT_SUCCESS)
}

fn pending_count(previews: &[StepPreview]) -> usize {
    previews.iter().filter(|p| !p.satisfied).count()
}

fn preview_line(p: &StepPreview) -> String {
    if p.satisfied {
        let ok = Style::new().green().apply_to("satisfied");
        format!("{:>2}. {} [{ok}]", p.position, p.name)
    } else {
        let todo = Style::new().yellow().apply_to("would apply");
        format!("{:>2}. {} [{todo}] needs {}", p.position, p.name, p.capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(position: usize, satisfied: bool) -> StepPreview {
        StepPreview {
            position,
            name: format!("step {position}"),
            capability: "binary git".to_owned(),
            satisfied,
        }
    }

    #[test]
    fn counts_unsatisfied_steps() {
        let previews = vec![preview(1, true), preview(2, false), preview(3, false)];
        assert_eq!(pending_count(&previews), 2);
    }

    #[test]
    fn unsatisfied_line_names_capability() {
        let line = preview_line(&preview(2, false));
        assert!(line.contains("step 2"));
        assert!(line.contains("binary git"));
    }
}
