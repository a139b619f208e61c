use std::fmt::Write;

use crate::models::{CohortAggregate, IndividualAssessment, Tier};
use crate::orchestrator::DashboardSnapshot;

const TIERS: [Tier; 4] = [
    Tier::Unclassified,
    Tier::Beginner,
    Tier::Intermediate,
    Tier::Confirmed,
];

pub fn build_report(snapshot: &DashboardSnapshot) -> String {
    let mut output = String::new();
    let scope_label = snapshot.scope.city.as_deref().unwrap_or("all cities");

    let _ = writeln!(output, "# Engagement Dashboard Report");
    let _ = writeln!(
        output,
        "Generated for {} (reference date {})",
        scope_label, snapshot.scope.reference_date
    );
    if let Some(period) = snapshot.scope.period {
        let _ = writeln!(output, "Promotion period: {period}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Summaries");
    write_summary(&mut output, "Promotions", &snapshot.promotion_summary);
    write_summary(&mut output, "Family groups", &snapshot.family_summary);
    write_summary(&mut output, "Services", &snapshot.service_summary);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Tier Distribution");
    if snapshot.assessments.is_empty() {
        let _ = writeln!(output, "No tracked individuals in this scope.");
    } else {
        for tier in TIERS {
            let count = snapshot
                .assessments
                .iter()
                .filter(|assessment| assessment.tier == tier)
                .count();
            let _ = writeln!(output, "- {tier}: {count}");
        }
    }

    let mut ranked: Vec<&IndividualAssessment> = snapshot.assessments.iter().collect();
    ranked.sort_by(|a, b| {
        b.average_score
            .partial_cmp(&a.average_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Engaged Individuals");
    if ranked.is_empty() {
        let _ = writeln!(output, "No tracked individuals in this scope.");
    } else {
        for assessment in ranked.iter().take(10) {
            let marker = if assessment.is_manual { ", manual" } else { "" };
            let _ = writeln!(
                output,
                "- {} ({}{}) average score {:.1} across {} scored months",
                assessment.display_name,
                assessment.tier,
                marker,
                assessment.average_score,
                assessment.months_count
            );
        }
    }

    output
}

fn write_summary(output: &mut String, label: &str, aggregate: &CohortAggregate) {
    let _ = writeln!(
        output,
        "- {}: {} members, {} present / {} absent, {} new this week, fidelisation {:.1}%",
        label,
        aggregate.total_members,
        aggregate.present_count,
        aggregate.absent_count,
        aggregate.new_members_count,
        aggregate.fidelisation_rate
    );
}
