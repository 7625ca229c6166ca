//! Unix seconds to and from the calendar fields the RTC keeps.
//!
//! Valid for 2000-01-01 through 2099-12-31, the range of the RTC's two-digit
//! year register.

pub const MIN_YEAR: u16 = 2000;
pub const MAX_YEAR: u16 = 2099;

const SECONDS_PER_DAY: u32 = 86_400;
/// Days from 1970-01-01 to 2000-01-01.
const DAYS_TO_2000: u32 = 10_957;

/// Broken-down UTC time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CivilTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// ISO weekday, Monday = 1 through Sunday = 7.
    pub weekday: u8,
}

const fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

const fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

const fn days_in_year(year: u16) -> u32 {
    if is_leap(year) { 366 } else { 365 }
}

/// Splits `epoch` into calendar fields. `None` outside the RTC range.
#[allow(clippy::cast_possible_truncation)]
pub fn to_civil(epoch: u32) -> Option<CivilTime> {
    let mut days = (epoch / SECONDS_PER_DAY).checked_sub(DAYS_TO_2000)?;
    let seconds = epoch % SECONDS_PER_DAY;
    // 2000-01-01 was a Saturday.
    let weekday = ((days + 5) % 7 + 1) as u8;

    let mut year = MIN_YEAR;
    while days >= days_in_year(year) {
        days -= days_in_year(year);
        year += 1;
        if year > MAX_YEAR {
            return None;
        }
    }
    let mut month = 1;
    while days >= u32::from(days_in_month(year, month)) {
        days -= u32::from(days_in_month(year, month));
        month += 1;
    }

    Some(CivilTime {
        year,
        month,
        day: days as u8 + 1,
        hour: (seconds / 3_600) as u8,
        minute: (seconds / 60 % 60) as u8,
        second: (seconds % 60) as u8,
        weekday,
    })
}

/// Joins calendar fields back into Unix seconds. `None` for impossible dates.
pub fn from_civil(time: &CivilTime) -> Option<u32> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&time.year)
        || !(1..=12).contains(&time.month)
        || time.day == 0
        || time.day > days_in_month(time.year, time.month)
        || time.hour > 23
        || time.minute > 59
        || time.second > 59
    {
        return None;
    }

    let mut days = DAYS_TO_2000;
    for year in MIN_YEAR..time.year {
        days += days_in_year(year);
    }
    for month in 1..time.month {
        days += u32::from(days_in_month(time.year, month));
    }
    days += u32::from(time.day - 1);

    Some(
        days * SECONDS_PER_DAY
            + u32::from(time.hour) * 3_600
            + u32::from(time.minute) * 60
            + u32::from(time.second),
    )
}
