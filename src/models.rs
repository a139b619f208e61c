use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortKind {
    Newcomer,
    ImpactFamilyMember,
}

/// A person followed by the engagement engine. Owned by the backend;
/// read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedIndividual {
    pub id: Uuid,
    pub display_name: String,
    pub cohort_kind: CohortKind,
    pub city: String,
    pub sector_id: Option<Uuid>,
    pub family_group_id: Option<Uuid>,
    pub assigned_period: Option<Period>,
    pub joined_at: NaiveDate,
}

/// One observed indicator for one individual. `kind` is the wire value;
/// kinds outside the weight table score zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub individual_id: Uuid,
    pub occurred_at: NaiveDate,
    pub kind: String,
    pub satisfied: bool,
}

/// Calendar-month bucket used to group activity events for scoring.
/// Rendered and parsed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (year, month) = raw
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got {raw:?}"))?;
        let year = year
            .parse()
            .map_err(|_| format!("invalid year in {raw:?}"))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in {raw:?}"))?;
        if !(1..=12).contains(&month) {
            return Err(format!("month out of range in {raw:?}"));
        }
        Ok(Self { year, month })
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive month range; an unset bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodRange {
    pub from: Option<Period>,
    pub to: Option<Period>,
}

impl PeriodRange {
    pub fn single(period: Period) -> Self {
        Self {
            from: Some(period),
            to: Some(period),
        }
    }

    pub fn contains(&self, period: Period) -> bool {
        self.from.map_or(true, |from| period >= from) && self.to.map_or(true, |to| period <= to)
    }
}

/// Discrete engagement level derived from the average score, unless a
/// manual override supplies one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Unclassified,
    Beginner,
    Intermediate,
    Confirmed,
}

impl Tier {
    /// Bucket for an average score. Bounds are inclusive: exactly 20 is
    /// `Beginner`, exactly 60 is `Confirmed`.
    pub fn for_score(average_score: f64) -> Self {
        if average_score >= 60.0 {
            Tier::Confirmed
        } else if average_score >= 40.0 {
            Tier::Intermediate
        } else if average_score >= 20.0 {
            Tier::Beginner
        } else {
            Tier::Unclassified
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Unclassified => "unclassified",
            Tier::Beginner => "beginner",
            Tier::Intermediate => "intermediate",
            Tier::Confirmed => "confirmed",
        };
        f.write_str(label)
    }
}

/// Administrator-supplied tier replacing the computed one. A `None` tier
/// defers to the computed tier. At most one current record per individual
/// at the backend; the audit log keeps the ordered trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub individual_id: Uuid,
    pub tier: Option<Tier>,
    pub comment: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

/// Scoring engine output for one individual's event history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierAssessment {
    pub tier: Tier,
    pub average_score: f64,
    pub months_count: usize,
    pub is_manual: bool,
}

/// A `TierAssessment` joined with identity, for dashboard rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndividualAssessment {
    pub individual_id: Uuid,
    pub display_name: String,
    pub tier: Tier,
    pub average_score: f64,
    pub months_count: usize,
    pub is_manual: bool,
}

/// Group-level counts and rates for one scope slice. Recomputed per query,
/// never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortAggregate {
    pub total_members: u64,
    pub present_count: u64,
    pub absent_count: u64,
    pub new_members_count: u64,
    pub fidelisation_rate: f64,
}

/// Dashboard filter state. Unset filters match everything; the reference
/// date anchors presence classification and the new-joiner window.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterScope {
    pub city: Option<String>,
    pub sector_id: Option<Uuid>,
    pub family_group_id: Option<Uuid>,
    pub period: Option<Period>,
    pub reference_date: NaiveDate,
}

impl FilterScope {
    pub fn for_date(reference_date: NaiveDate) -> Self {
        Self {
            city: None,
            sector_id: None,
            family_group_id: None,
            period: None,
            reference_date,
        }
    }

    pub fn matches(&self, individual: &TrackedIndividual) -> bool {
        self.city
            .as_deref()
            .map_or(true, |city| individual.city == city)
            && self
                .sector_id
                .map_or(true, |sector| individual.sector_id == Some(sector))
            && self
                .family_group_id
                .map_or(true, |group| individual.family_group_id == Some(group))
            && self
                .period
                .map_or(true, |period| individual.assigned_period == Some(period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_and_renders() {
        let period: Period = "2026-03".parse().unwrap();
        assert_eq!(period, Period { year: 2026, month: 3 });
        assert_eq!(period.to_string(), "2026-03");
    }

    #[test]
    fn period_rejects_out_of_range_month() {
        assert!("2026-13".parse::<Period>().is_err());
        assert!("2026".parse::<Period>().is_err());
    }

    #[test]
    fn period_range_bounds_are_inclusive() {
        let range = PeriodRange {
            from: Some(Period { year: 2026, month: 2 }),
            to: Some(Period { year: 2026, month: 4 }),
        };
        assert!(range.contains(Period { year: 2026, month: 2 }));
        assert!(range.contains(Period { year: 2026, month: 4 }));
        assert!(!range.contains(Period { year: 2026, month: 5 }));
        assert!(PeriodRange::default().contains(Period { year: 1999, month: 1 }));
    }

    #[test]
    fn unset_filters_match_everything() {
        let individual = TrackedIndividual {
            id: Uuid::new_v4(),
            display_name: "Naomi Kasongo".to_string(),
            cohort_kind: CohortKind::Newcomer,
            city: "Brussels".to_string(),
            sector_id: None,
            family_group_id: None,
            assigned_period: None,
            joined_at: NaiveDate::from_ymd_opt(2026, 1, 4).unwrap(),
        };
        let open = FilterScope::for_date(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert!(open.matches(&individual));

        let mut scoped = open.clone();
        scoped.city = Some("Paris".to_string());
        assert!(!scoped.matches(&individual));
    }
}
