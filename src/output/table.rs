//! Summary table rendering.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::rancher::types::Service;
use crate::upgrade::fleet::{FleetReport, MemberPhase, UpgradeOutcome};

/// Row for the upgrade summary table.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "PHASE")]
    phase: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "RESULT")]
    result: String,
}

/// Print one row per member followed by a one-line summary.
pub fn print_fleet_report(report: &FleetReport) {
    if report.outcomes.is_empty() {
        println!("No services upgraded.");
        return;
    }

    let title = if report.dry_run {
        "Upgrade plan (dry run):"
    } else {
        "Upgrade results:"
    };
    println!();
    println!("{}", title.bold());

    let mut table = Table::new(build_rows(report));
    table.with(Style::sharp());
    println!("{}", table);

    println!("{}", summary_line(report));
}

/// Print the state of a service after a lifecycle action.
pub fn print_service_state(action: &str, service: &Service) {
    println!(
        "{} {} {} (state: {}, image: {})",
        "✓".green(),
        action,
        service.name.bold(),
        service.state,
        service.image()
    );
}

fn build_rows(report: &FleetReport) -> Vec<OutcomeRow> {
    report
        .outcomes
        .iter()
        .map(|outcome| {
            let phase = report.final_state(outcome);
            OutcomeRow {
                service: outcome.service.clone(),
                phase: colorize_phase(phase),
                image: outcome_image(outcome),
                result: match &outcome.result {
                    Ok(_) if report.dry_run => "would upgrade".to_string(),
                    Ok(_) => "ok".to_string(),
                    Err(e) => format!("{} (at {})", e, outcome.phase),
                },
            }
        })
        .collect()
}

fn colorize_phase(phase: MemberPhase) -> String {
    let label = phase.to_string();
    match phase {
        MemberPhase::Done => label.green().to_string(),
        MemberPhase::RolledBack => label.yellow().to_string(),
        MemberPhase::Failed => label.red().to_string(),
        _ => label,
    }
}

fn outcome_image(outcome: &UpgradeOutcome) -> String {
    match (&outcome.result, &outcome.snapshot) {
        (Ok(service), _) => service.image().to_string(),
        (Err(_), Some(service)) => service.image().to_string(),
        (Err(_), None) => "-".to_string(),
    }
}

fn summary_line(report: &FleetReport) -> String {
    let failed = report.failed();
    let succeeded = report.total() - failed;
    let mut line = format!("{}/{} succeeded", succeeded, report.total());

    if failed > 0 {
        line.push_str(&format!(", {} failed", failed));
    }
    if !report.compensated.is_empty() {
        line.push_str(&format!(", {} compensated", report.compensated.len()));
    }
    if report.compensation_error.is_some() {
        line.push_str(", compensation stopped early");
    }

    if failed == 0 {
        line.green().to_string()
    } else {
        line.red().to_string()
    }
}
