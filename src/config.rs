use std::env;
use std::time::Duration;

use chrono::NaiveTime;

use crate::availability::BusinessHours;

// runtime knobs for the availability grid and the webhook dedup cache;
// the 08:00-20:00 / 30-minute values are defaults, not constants
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub hours: BusinessHours,
    // when true, conflicts are scoped to the assigned team member
    // instead of the whole account
    pub member_scoped: bool,
    pub dedup_ttl: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            hours: BusinessHours::new(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                30,
            ),
            member_scoped: false,
            dedup_ttl: Duration::from_secs(600),
        }
    }
}

pub fn load_schedule_config() -> ScheduleConfig {
    let defaults = ScheduleConfig::default();
    let open = env_time("SCHEDULE_OPEN", defaults.hours.open);
    let close = env_time("SCHEDULE_CLOSE", defaults.hours.close);
    let step = env::var("SCHEDULE_STEP_MINUTES")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(defaults.hours.step_minutes);
    let member_scoped = env::var("MEMBER_SCOPED_AVAILABILITY")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(defaults.member_scoped);
    let dedup_ttl = env::var("WEBHOOK_DEDUP_TTL_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.dedup_ttl);

    ScheduleConfig {
        hours: BusinessHours::new(open, close, step),
        member_scoped,
        dedup_ttl,
    }
}

fn env_time(var: &str, default: NaiveTime) -> NaiveTime {
    env::var(var)
        .ok()
        .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
        .unwrap_or(default)
}
