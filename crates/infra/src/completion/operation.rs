//! Operation results and immediate-vs-deferred classification.
//!
//! An entitlement change may take effect on a future date (requested date,
//! billing policy, plugin override). Only the domain call knows the final
//! effective date, so timing is reported *by* the operation, after it ran.

use chrono::{FixedOffset, NaiveDate};

use billflow_core::Clock;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EffectTiming {
    /// Downstream events are expected shortly.
    Immediate,
    /// The effect is scheduled; nothing will happen before `effective`.
    Deferred { effective: NaiveDate },
}

impl EffectTiming {
    /// Deferred if any of `effective_dates` is strictly after `today`
    /// (the latest such date is reported), immediate otherwise.
    pub fn classify<I>(effective_dates: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        match effective_dates.into_iter().filter(|d| *d > today).max() {
            Some(effective) => EffectTiming::Deferred { effective },
            None => EffectTiming::Immediate,
        }
    }

    /// [`classify`](Self::classify) against the account-local date.
    pub fn for_account<I>(effective_dates: I, clock: &dyn Clock, account_offset: FixedOffset) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        Self::classify(effective_dates, clock.today_in(account_offset))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, EffectTiming::Immediate)
    }
}

/// Value returned by a domain operation, plus its timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed<T> {
    value: T,
    timing: EffectTiming,
}

impl<T> Executed<T> {
    pub fn new(value: T, timing: EffectTiming) -> Self {
        Self { value, timing }
    }

    pub fn immediate(value: T) -> Self {
        Self::new(value, EffectTiming::Immediate)
    }

    pub fn deferred(value: T, effective: NaiveDate) -> Self {
        Self::new(value, EffectTiming::Deferred { effective })
    }

    pub fn timing(&self) -> EffectTiming {
        self.timing
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn into_parts(self) -> (T, EffectTiming) {
        (self.value, self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billflow_core::FixedClock;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn today_and_past_are_immediate() {
        let today = date(2024, 5, 10);
        assert_eq!(EffectTiming::classify([today], today), EffectTiming::Immediate);
        assert_eq!(EffectTiming::classify([date(2024, 5, 1)], today), EffectTiming::Immediate);
        assert_eq!(EffectTiming::classify(std::iter::empty(), today), EffectTiming::Immediate);
    }

    #[test]
    fn any_future_date_defers() {
        let today = date(2024, 5, 10);
        let timing = EffectTiming::classify([today, date(2024, 6, 1), date(2024, 5, 11)], today);
        assert_eq!(timing, EffectTiming::Deferred { effective: date(2024, 6, 1) });
    }

    #[test]
    fn account_offset_decides_what_today_is() {
        // 2024-05-11 01:00 UTC is still May 10 in UTC-8.
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 11, 1, 0, 0).unwrap());
        let pacific = FixedOffset::west_opt(8 * 3600).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();

        let effective = [date(2024, 5, 11)];
        assert!(!EffectTiming::for_account(effective, &clock, pacific).is_immediate());
        assert!(EffectTiming::for_account(effective, &clock, utc).is_immediate());
    }
}
