use chrono::{
    DateTime, Datelike, Days, LocalResult, Months, NaiveDateTime, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PAUSED_BIT: u8 = 0x80;
const KIND_MASK: u8 = 0x7F;

/// Upper bound on how many intervals are stepped over while catching up with "now".
const MAX_CATCH_UP_STEPS: u32 = 500_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("Unknown timezone {0:?}")]
    InvalidTimezone(String),

    #[error("Unknown recurrence kind {0}")]
    InvalidRecurrenceKind(u8),

    #[error("No occurrence after {from} could be found within {steps} steps")]
    IterationLimitExceeded { from: DateTime<Utc>, steps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecurrenceKind {
    Once = 0,
    Yearly = 1,
    Monthly = 2,
    Weekly = 3,
    Daily = 4,
    Hourly = 5,
    Workdays = 6,
    Weekends = 7,
}

impl TryFrom<u8> for RecurrenceKind {
    type Error = RecurrenceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let kind = match value {
            0 => Self::Once,
            1 => Self::Yearly,
            2 => Self::Monthly,
            3 => Self::Weekly,
            4 => Self::Daily,
            5 => Self::Hourly,
            6 => Self::Workdays,
            7 => Self::Weekends,
            other => return Err(RecurrenceError::InvalidRecurrenceKind(other)),
        };

        Ok(kind)
    }
}

/// Packed recurrence byte: bits 0-6 hold the [`RecurrenceKind`], bit 7 is the pause flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecurrenceState(u8);

impl RecurrenceState {
    pub const fn new(kind: RecurrenceKind, paused: bool) -> Self {
        Self(kind as u8).with_paused(paused)
    }

    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub fn kind(self) -> Result<RecurrenceKind, RecurrenceError> {
        RecurrenceKind::try_from(self.0 & KIND_MASK)
    }

    pub const fn is_paused(self) -> bool {
        self.0 & PAUSED_BIT != 0
    }

    pub const fn is_one_shot(self) -> bool {
        self.0 & KIND_MASK == 0
    }

    pub const fn with_paused(self, paused: bool) -> Self {
        if paused {
            Self(self.0 | PAUSED_BIT)
        } else {
            Self(self.0 & KIND_MASK)
        }
    }
}

impl From<RecurrenceKind> for RecurrenceState {
    fn from(kind: RecurrenceKind) -> Self {
        Self::new(kind, false)
    }
}

pub fn parse_timezone(timezone: &str) -> Result<Tz, RecurrenceError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| RecurrenceError::InvalidTimezone(timezone.to_owned()))
}

/// Computes the next fire instant strictly after the current system time.
pub fn next_occurrence(
    from: DateTime<Utc>,
    state: RecurrenceState,
    timezone: &str,
) -> Result<DateTime<Utc>, RecurrenceError> {
    next_occurrence_after(from, state, timezone, Utc::now())
}

/// Computes the first occurrence of `state` after `from` that is strictly later than `now`.
///
/// Calendar kinds (yearly, monthly, weekly, daily, workdays, weekends) are advanced on the local
/// wall-clock of `timezone`, so the displayed time of day survives daylight-saving shifts.
/// Hourly reminders advance by elapsed time instead. A paused state returns `from` unchanged.
pub fn next_occurrence_after(
    from: DateTime<Utc>,
    state: RecurrenceState,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, RecurrenceError> {
    if state.is_paused() {
        return Ok(from);
    }

    let tz = parse_timezone(timezone)?;
    let kind = state.kind()?;

    match kind {
        RecurrenceKind::Once => Ok(from),
        RecurrenceKind::Hourly => next_elapsed(from, TimeDelta::hours(1), now),
        RecurrenceKind::Workdays => next_matching_day(from, &tz, now, is_workday),
        RecurrenceKind::Weekends => next_matching_day(from, &tz, now, |day| !is_workday(day)),
        calendar => next_calendar(from, calendar, &tz, now),
    }
}

fn next_elapsed(
    from: DateTime<Utc>,
    step: TimeDelta,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let mut candidate = from;
    for _ in 0..MAX_CATCH_UP_STEPS {
        candidate += step;
        if candidate > now {
            return Ok(candidate);
        }
    }

    Err(RecurrenceError::IterationLimitExceeded {
        from,
        steps: MAX_CATCH_UP_STEPS,
    })
}

fn next_calendar(
    from: DateTime<Utc>,
    kind: RecurrenceKind,
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let base = from.with_timezone(tz).naive_local();

    // Each step is measured from the base so month-end clamping does not accumulate.
    for step in 1..=MAX_CATCH_UP_STEPS {
        let Some(local) = advance_local(base, kind, step) else {
            break;
        };

        match resolve_local(tz, local) {
            Some(candidate) if candidate > now => return Ok(candidate),
            _ => continue,
        }
    }

    Err(RecurrenceError::IterationLimitExceeded {
        from,
        steps: MAX_CATCH_UP_STEPS,
    })
}

fn next_matching_day(
    from: DateTime<Utc>,
    tz: &Tz,
    now: DateTime<Utc>,
    qualifies: impl Fn(Weekday) -> bool,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let base = from.with_timezone(tz).naive_local();

    for step in 1..=MAX_CATCH_UP_STEPS {
        let Some(local) = base.checked_add_days(Days::new(step.into())) else {
            break;
        };

        if !qualifies(local.weekday()) {
            continue;
        }

        match resolve_local(tz, local) {
            Some(candidate) if candidate > now => return Ok(candidate),
            _ => continue,
        }
    }

    Err(RecurrenceError::IterationLimitExceeded {
        from,
        steps: MAX_CATCH_UP_STEPS,
    })
}

fn advance_local(base: NaiveDateTime, kind: RecurrenceKind, step: u32) -> Option<NaiveDateTime> {
    match kind {
        RecurrenceKind::Yearly => base.checked_add_months(Months::new(step.checked_mul(12)?)),
        RecurrenceKind::Monthly => base.checked_add_months(Months::new(step)),
        RecurrenceKind::Weekly => base.checked_add_days(Days::new(u64::from(step) * 7)),
        RecurrenceKind::Daily => base.checked_add_days(Days::new(step.into())),
        _ => None,
    }
}

/// Maps a local wall-clock time to an instant. Times skipped by a forward DST jump land one hour
/// later, repeated times during a backward jump take the earlier instant.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let resolved = match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest()?,
    };

    Some(resolved.with_timezone(&Utc))
}

fn is_workday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}
