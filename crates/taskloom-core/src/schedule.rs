//! [`Schedule`] — an opaque "next firing instant" value object, computed
//! from one of the two recognized forms in SPEC_FULL.md §6: a cron-like
//! pattern (including `@every`/`@hourly`-style descriptors) or a calendar
//! recurrence rule. The rest of the engine only ever calls
//! [`Schedule::next_after`]; it never inspects which form produced it.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc, Weekday};
use rrule::{Frequency, RRule, RRuleSet, Tz};

/// Fluent builder over a calendar recurrence rule, ported from the
/// original's `schedule.go` (itself a thin wrapper over `rrule-go`).
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    freq: Frequency,
    interval: u16,
    weekdays: Vec<Weekday>,
    hours: Vec<u8>,
    minutes: Vec<u8>,
}

impl RecurrenceRule {
    fn new(freq: Frequency) -> Self {
        Self {
            freq,
            interval: 1,
            weekdays: Vec::new(),
            hours: Vec::new(),
            minutes: Vec::new(),
        }
    }

    pub fn interval(mut self, interval: u16) -> Self {
        self.interval = interval;
        self
    }

    pub fn at_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.weekdays.extend(days);
        self
    }

    pub fn at_hours(mut self, hours: impl IntoIterator<Item = u8>) -> Self {
        self.hours = hours.into_iter().collect();
        self
    }

    pub fn at_minutes(mut self, minutes: impl IntoIterator<Item = u8>) -> Self {
        self.minutes = minutes.into_iter().collect();
        self
    }

    fn to_rrule_set(&self, dtstart: DateTime<Tz>) -> anyhow::Result<RRuleSet> {
        let mut rule = RRule::new(self.freq).interval(self.interval as i16);

        if !self.weekdays.is_empty() {
            rule = rule.by_weekday(
                self.weekdays
                    .iter()
                    .map(|d| rrule::NWeekday::Every(to_rrule_weekday(*d)))
                    .collect(),
            );
        }
        if !self.hours.is_empty() {
            rule = rule.by_hour(self.hours.iter().map(|h| *h as i8).collect());
        }
        if !self.minutes.is_empty() {
            rule = rule.by_minute(self.minutes.iter().map(|m| *m as i8).collect());
        }

        let validated = rule
            .validate(dtstart)
            .map_err(|e| anyhow::anyhow!("invalid recurrence rule: {e}"))?;

        Ok(RRuleSet::new(dtstart).rrule(validated))
    }

    /// Render back to a string so the store layer has something to persist
    /// in the `rrule_pattern` column (spec.md §6's persisted task layout).
    pub fn to_pattern_string(&self) -> String {
        format!(
            "FREQ={:?};INTERVAL={};BYDAY={:?};BYHOUR={:?};BYMINUTE={:?}",
            self.freq, self.interval, self.weekdays, self.hours, self.minutes
        )
    }
}

fn to_rrule_weekday(day: Weekday) -> rrule::Weekday {
    match day {
        Weekday::Mon => rrule::Weekday::Mon,
        Weekday::Tue => rrule::Weekday::Tue,
        Weekday::Wed => rrule::Weekday::Wed,
        Weekday::Thu => rrule::Weekday::Thu,
        Weekday::Fri => rrule::Weekday::Fri,
        Weekday::Sat => rrule::Weekday::Sat,
        Weekday::Sun => rrule::Weekday::Sun,
    }
}

pub fn every_second() -> RecurrenceRule {
    RecurrenceRule::new(Frequency::Secondly)
}

pub fn every_hour() -> RecurrenceRule {
    RecurrenceRule::new(Frequency::Hourly)
}

pub fn every_day() -> RecurrenceRule {
    RecurrenceRule::new(Frequency::Daily)
}

pub fn every_week() -> RecurrenceRule {
    RecurrenceRule::new(Frequency::Weekly)
}

pub fn every_month() -> RecurrenceRule {
    RecurrenceRule::new(Frequency::Monthly)
}

/// A schedule, in whichever of the two recognized forms it was built from.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Standard five-field cron plus descriptors (`@hourly`, …).
    Cron(cron::Schedule),
    /// `@every <duration>`: fires at a fixed wall-clock interval rather than
    /// aligning to a cron grid, exactly as the original's parser handles it.
    Interval(StdDuration),
    /// A calendar recurrence rule.
    Recurrence(RecurrenceRule),
}

impl Schedule {
    /// Parse a cron-like pattern, recognizing the `@every`/`@hourly`/etc
    /// descriptors the original's `robfig/cron` parser supported in
    /// addition to raw five-field expressions.
    pub fn from_cron_pattern(pattern: &str) -> anyhow::Result<Self> {
        let trimmed = pattern.trim();

        if let Some(rest) = trimmed.strip_prefix("@every ") {
            let dur = parse_go_duration(rest)?;
            return Ok(Schedule::Interval(dur));
        }

        let normalized = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let schedule = cron::Schedule::from_str(&five_to_six_field(normalized))
            .map_err(|e| anyhow::anyhow!("invalid cron pattern {pattern:?}: {e}"))?;

        Ok(Schedule::Cron(schedule))
    }

    pub fn recurrence(rule: RecurrenceRule) -> Self {
        Schedule::Recurrence(rule)
    }

    /// Next firing instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule
                .after(&now)
                .next()
                .ok_or_else(|| anyhow::anyhow!("cron schedule produced no further occurrences")),
            Schedule::Interval(dur) => Ok(now + Duration::from_std(*dur)?),
            Schedule::Recurrence(rule) => {
                let dtstart = now.with_timezone(&Tz::UTC);
                let set = rule.to_rrule_set(dtstart)?;
                let (occurrences, _) = set.after(dtstart).all(1);
                occurrences
                    .into_iter()
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| anyhow::anyhow!("recurrence rule produced no further occurrences"))
            }
        }
    }

    /// What the store layer should persist in `pattern`/`rrule_pattern`.
    pub fn to_stored(&self) -> (Option<String>, Option<String>) {
        match self {
            Schedule::Cron(schedule) => (Some(schedule.to_string()), None),
            Schedule::Interval(dur) => (Some(format!("@every {}s", dur.as_secs())), None),
            Schedule::Recurrence(rule) => (None, Some(rule.to_pattern_string())),
        }
    }
}

/// cron 0.12 parses 6/7-field expressions (seconds-first); upconvert a
/// standard 5-field minute-first expression by prepending a seconds field.
fn five_to_six_field(pattern: &str) -> String {
    if pattern.split_whitespace().count() <= 5 {
        format!("0 {pattern}")
    } else {
        pattern.to_string()
    }
}

/// Minimal subset of Go's `time.ParseDuration` needed for `@every` patterns
/// (`s`, `m`, `h` suffixes), matching what the original's job configs use.
fn parse_go_duration(s: &str) -> anyhow::Result<StdDuration> {
    let s = s.trim();
    let (num, unit) = s.split_at(
        s.find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| anyhow::anyhow!("malformed duration {s:?}"))?,
    );
    let value: f64 = num.parse()?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => anyhow::bail!("unsupported duration unit {other:?}"),
    };
    Ok(StdDuration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_descriptor_is_a_fixed_interval() {
        let schedule = Schedule::from_cron_pattern("@every 1s").unwrap();
        assert!(matches!(schedule, Schedule::Interval(d) if d.as_secs() == 1));
    }

    #[test]
    fn hourly_descriptor_normalizes_to_cron() {
        let schedule = Schedule::from_cron_pattern("@hourly").unwrap();
        assert!(matches!(schedule, Schedule::Cron(_)));
    }

    #[test]
    fn five_field_pattern_parses() {
        let schedule = Schedule::from_cron_pattern("*/5 * * * *").unwrap();
        let now = Utc::now();
        let next = schedule.next_after(now).unwrap();
        assert!(next > now);
    }
}
