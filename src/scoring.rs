use std::collections::BTreeMap;

use crate::models::{ActivityEvent, ManualOverride, Period, Tier, TierAssessment};

/// Weight for a recognized indicator kind; anything else scores zero and
/// never contributes a scored month.
pub fn weight_for(kind: &str) -> Option<u32> {
    match kind {
        "sunday_attendance" => Some(5),
        "impact_family_attendance" => Some(2),
        "disciple_meeting_attendance" => Some(3),
        "church_service_duty" => Some(6),
        "daily_bread_consumption" => Some(5),
        "baptism" => Some(2),
        _ => None,
    }
}

/// Per-month score sums over satisfied, recognized events. Months without
/// any such event are absent from the map.
pub fn monthly_scores(events: &[ActivityEvent]) -> BTreeMap<Period, u32> {
    let mut scores: BTreeMap<Period, u32> = BTreeMap::new();

    for event in events {
        if !event.satisfied {
            continue;
        }
        let Some(weight) = weight_for(&event.kind) else {
            continue;
        };
        *scores
            .entry(Period::from_date(event.occurred_at))
            .or_insert(0) += weight;
    }

    scores
}

/// Average monthly score and tier for one individual's history.
///
/// A non-null override tier takes precedence over the computed one; the
/// computed average and month count are reported either way. Empty input is
/// a valid state: zero months, score 0, `unclassified`.
pub fn assess(events: &[ActivityEvent], manual: Option<&ManualOverride>) -> TierAssessment {
    let scores = monthly_scores(events);
    let months_count = scores.len();
    let average_score = if months_count == 0 {
        0.0
    } else {
        scores.values().map(|score| f64::from(*score)).sum::<f64>() / months_count as f64
    };

    if let Some(tier) = manual.and_then(|record| record.tier) {
        return TierAssessment {
            tier,
            average_score,
            months_count,
            is_manual: true,
        };
    }

    TierAssessment {
        tier: Tier::for_score(average_score),
        average_score,
        months_count,
        is_manual: false,
    }
}
