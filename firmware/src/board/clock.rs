use embassy_stm32::pac;
use embassy_stm32::rtc::{DateTime, DayOfWeek, Rtc};
use node_core::session::Clock;

use crate::epoch::{CivilTime, from_civil, to_civil};

/// Unix seconds kept in the backup-domain calendar.
pub struct RtcClock {
    rtc: Rtc,
}

impl RtcClock {
    pub fn new(rtc: Rtc) -> Self {
        Self { rtc }
    }
}

impl Clock for RtcClock {
    fn now(&mut self) -> Option<u32> {
        // INITS stays clear until the calendar has been written once.
        if !pac::RTC.icsr().read().inits() {
            return None;
        }
        let now = self.rtc.now().ok()?;
        from_civil(&CivilTime {
            year: now.year(),
            month: now.month(),
            day: now.day(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
            weekday: weekday_number(now.day_of_week()),
        })
    }

    fn set(&mut self, epoch: u32) {
        let Some(civil) = to_civil(epoch) else {
            defmt::warn!("clock: {} is outside the calendar range", epoch);
            return;
        };
        let datetime = DateTime::from(
            civil.year,
            civil.month,
            civil.day,
            day_of_week(civil.weekday),
            civil.hour,
            civil.minute,
            civil.second,
            0,
        );
        match datetime {
            Ok(datetime) => {
                if self.rtc.set_datetime(datetime).is_err() {
                    defmt::warn!("clock: calendar write failed");
                }
            }
            Err(_) => defmt::warn!("clock: rejected calendar fields for {}", epoch),
        }
    }
}

fn day_of_week(weekday: u8) -> DayOfWeek {
    match weekday {
        1 => DayOfWeek::Monday,
        2 => DayOfWeek::Tuesday,
        3 => DayOfWeek::Wednesday,
        4 => DayOfWeek::Thursday,
        5 => DayOfWeek::Friday,
        6 => DayOfWeek::Saturday,
        _ => DayOfWeek::Sunday,
    }
}

fn weekday_number(day: DayOfWeek) -> u8 {
    match day {
        DayOfWeek::Monday => 1,
        DayOfWeek::Tuesday => 2,
        DayOfWeek::Wednesday => 3,
        DayOfWeek::Thursday => 4,
        DayOfWeek::Friday => 5,
        DayOfWeek::Saturday => 6,
        DayOfWeek::Sunday => 7,
    }
}
