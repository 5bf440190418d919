use time::{Date, Duration, Weekday};

/// An inclusive range of calendar dates. Construction does not validate the
/// ordering; callers that accept untrusted input check `start <= end` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Self {
        Self { start, end }
    }

    /// Single-day range.
    pub fn day(date: Date) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    /// The number of business days (weekdays, no holiday calendar) covered by
    /// this range, inclusive on both ends. A reversed range covers none.
    pub fn business_days(&self) -> u32 {
        if self.start > self.end {
            return 0;
        }

        let mut count = 0;
        let mut day = self.start;
        loop {
            if is_business_day(day) {
                count += 1;
            }
            if day >= self.end {
                break;
            }
            day += Duration::days(1);
        }

        count
    }
}

pub fn is_business_day(date: Date) -> bool {
    !matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday)
}

/// The first business day strictly after `date`.
pub fn next_business_day(date: Date) -> Date {
    let mut day = date + Duration::days(1);
    while !is_business_day(day) {
        day += Duration::days(1);
    }
    day
}
