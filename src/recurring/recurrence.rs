use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recurrence {
    Weekly,
    Biweekly,
    #[default]
    Monthly,
    Bimonthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Weekly => "WEEKLY",
            Recurrence::Biweekly => "BIWEEKLY",
            Recurrence::Monthly => "MONTHLY",
            Recurrence::Bimonthly => "BIMONTHLY",
            Recurrence::Quarterly => "QUARTERLY",
            Recurrence::Semiannual => "SEMIANNUAL",
            Recurrence::Annual => "ANNUAL",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "WEEKLY" => Recurrence::Weekly,
            "BIWEEKLY" => Recurrence::Biweekly,
            "BIMONTHLY" => Recurrence::Bimonthly,
            "QUARTERLY" => Recurrence::Quarterly,
            "SEMIANNUAL" => Recurrence::Semiannual,
            "ANNUAL" => Recurrence::Annual,
            _ => Recurrence::Monthly,
        }
    }

    /// One interval after `from`. Month steps clamp to the last day of the target month.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Recurrence::Weekly => return from + Duration::days(7),
            Recurrence::Biweekly => return from + Duration::days(14),
            Recurrence::Monthly => 1,
            Recurrence::Bimonthly => 2,
            Recurrence::Quarterly => 3,
            Recurrence::Semiannual => 6,
            Recurrence::Annual => 12,
        };
        from.checked_add_months(Months::new(months)).unwrap_or(from)
    }
}

/// key: recurring-catch-up -> next execution never piles up missed intervals
pub fn next_execution(
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    recurrence: Recurrence,
) -> DateTime<Utc> {
    recurrence.next_after(scheduled.max(now))
}
