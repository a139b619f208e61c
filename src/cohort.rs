use crate::models::{ActivityEvent, CohortAggregate, FilterScope, TrackedIndividual};

/// Folds individual records into group-level counts and rates for one scope
/// slice. Pure function of its inputs: identical inputs produce identical
/// output.
///
/// Presence classification uses only events dated exactly on the scope's
/// reference date: any satisfied event marks the member present, a recorded
/// but never-satisfied set marks them absent, and members with no record
/// count toward neither side.
pub fn aggregate(
    scope: &FilterScope,
    individuals: &[TrackedIndividual],
    presence_events: &[ActivityEvent],
) -> CohortAggregate {
    let members: Vec<&TrackedIndividual> = individuals
        .iter()
        .filter(|individual| scope.matches(individual))
        .collect();
    let total_members = members.len() as u64;

    let mut present_count = 0u64;
    let mut absent_count = 0u64;
    let mut new_members_count = 0u64;

    for member in &members {
        let mut recorded = false;
        let mut present = false;

        for event in presence_events {
            if event.individual_id != member.id || event.occurred_at != scope.reference_date {
                continue;
            }
            recorded = true;
            if event.satisfied {
                present = true;
                break;
            }
        }

        if present {
            present_count += 1;
        } else if recorded {
            absent_count += 1;
        }

        let days_since_joining = (scope.reference_date - member.joined_at).num_days();
        if (0..=7).contains(&days_since_joining) {
            new_members_count += 1;
        }
    }

    let fidelisation_rate = if total_members == 0 {
        0.0
    } else {
        round_one_decimal(present_count as f64 / total_members as f64 * 100.0)
    };

    CohortAggregate {
        total_members,
        present_count,
        absent_count,
        new_members_count,
        fidelisation_rate,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
