use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::database::models::{BlockedDateRange, Booking};

// Half-open interval in minutes since midnight. An existing booking
// occupies [time, time + duration + buffer): the buffer keeps the
// resource idle after the appointment ends. A proposed interval carries
// no buffer of its own; its buffer constrains later bookings once it is
// in the occupied set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    start: i64,
    end: i64,
}

impl Interval {
    pub fn starting_at(time: NaiveTime, duration_minutes: i64) -> Interval {
        let start = minutes_of(time);
        Interval {
            start,
            end: start + duration_minutes,
        }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

fn occupied_interval(booking: &Booking, buffer_minutes: i64) -> Interval {
    Interval::starting_at(booking.time, booking.duration_minutes as i64 + buffer_minutes)
}

fn minutes_of(time: NaiveTime) -> i64 {
    time.hour() as i64 * 60 + time.minute() as i64
}

fn time_of(minutes: i64) -> NaiveTime {
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0).unwrap()
}

// Whether every booking of the account blocks a slot, or only those
// assigned to the same team member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictScope {
    Business,
    TeamMember(String),
}

impl ConflictScope {
    pub fn covers(&self, booking: &Booking) -> bool {
        match self {
            ConflictScope::Business => true,
            ConflictScope::TeamMember(member) => {
                booking.team_member_id.as_deref() == Some(member.as_str())
            }
        }
    }
}

pub fn has_conflict(
    proposed: Interval,
    scope: &ConflictScope,
    buffer_minutes: i64,
    existing: &[Booking],
) -> bool {
    existing
        .iter()
        .filter(|b| scope.covers(b))
        .any(|b| proposed.overlaps(&occupied_interval(b, buffer_minutes)))
}

#[derive(Debug, Clone)]
pub struct BusinessHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub step_minutes: i64,
}

impl BusinessHours {
    pub fn new(open: NaiveTime, close: NaiveTime, step_minutes: i64) -> BusinessHours {
        BusinessHours {
            open,
            close,
            step_minutes,
        }
    }
}

pub fn date_is_blocked(date: NaiveDate, ranges: &[BlockedDateRange]) -> bool {
    ranges.iter().any(|r| r.start_date <= date && date <= r.end_date)
}

// Candidate start times for one date, chronological. Lazy and Clone so
// callers can restart the walk without recomputing the occupied set.
#[derive(Debug, Clone)]
pub struct SlotIter {
    cursor: i64,
    close: i64,
    step: i64,
    span: i64,
    occupied: Vec<Interval>,
}

impl Iterator for SlotIter {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<NaiveTime> {
        while self.cursor < self.close {
            let candidate = Interval {
                start: self.cursor,
                end: self.cursor + self.span,
            };
            self.cursor += self.step;
            if !self.occupied.iter().any(|o| candidate.overlaps(o)) {
                return Some(time_of(candidate.start));
            }
        }
        None
    }
}

// Existing bookings must already be narrowed to the queried date and
// conflict scope. Occupied intervals are taken as-is: a booking running
// past closing time still blocks the candidates it overlaps.
pub fn available_slots(
    date: NaiveDate,
    service_duration_minutes: i64,
    buffer_minutes: i64,
    existing_bookings: &[Booking],
    blocked_ranges: &[BlockedDateRange],
    hours: &BusinessHours,
) -> SlotIter {
    let open = minutes_of(hours.open);
    let close = minutes_of(hours.close);
    let cursor = if date_is_blocked(date, blocked_ranges) {
        close
    } else {
        open
    };
    let occupied = existing_bookings
        .iter()
        .map(|b| occupied_interval(b, buffer_minutes))
        .collect();

    SlotIter {
        cursor,
        close,
        step: hours.step_minutes,
        span: service_duration_minutes,
        occupied,
    }
}
