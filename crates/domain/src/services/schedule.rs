use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDateTime, NaiveTime, Offset, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use tracing::warn;

use crate::entities::{ApplicationInstance, Schedule};
use crate::value_objects::InstanceStatus;

/// 实例是否接受调度的参数名
pub const ACTIVE_PARAMETER: &str = "active";

/// 解析 `(parameter, now)` 对应的生效调度
#[derive(Debug, Clone, Default)]
pub struct ScheduleEvaluator {
    schedules: Vec<Schedule>,
}

impl ScheduleEvaluator {
    pub fn new(schedules: Vec<Schedule>) -> Self {
        Self { schedules }
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// 匹配星期与时间窗口的调度中，优先级最高者胜出，同优先级取最早开始者
    pub fn active_schedule(&self, parameter: &str, now: DateTime<Utc>) -> Option<&Schedule> {
        self.schedules
            .iter()
            .filter(|s| s.parameter == parameter && schedule_matches(s, now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.start_time.cmp(&b.start_time))
                    .then(a.id.cmp(&b.id))
            })
    }

    pub fn active_value(&self, parameter: &str, now: DateTime<Utc>) -> Option<String> {
        self.active_schedule(parameter, now)
            .and_then(|s| s.value.clone())
    }

    pub fn active_value_or(&self, parameter: &str, now: DateTime<Utc>, default: &str) -> String {
        self.active_value(parameter, now)
            .unwrap_or_else(|| default.to_string())
    }

    /// 实例的派生状态
    pub fn instance_status(
        &self,
        instance: &ApplicationInstance,
        now: DateTime<Utc>,
        offline_after_seconds: i64,
    ) -> InstanceStatus {
        let Some(heartbeat) = instance.heartbeat else {
            return InstanceStatus::Created;
        };

        if (now - heartbeat).num_seconds() >= offline_after_seconds {
            return InstanceStatus::Offline;
        }

        if self.active_value_or(ACTIVE_PARAMETER, now, "Y") == "N" {
            return InstanceStatus::Inactive;
        }

        InstanceStatus::Online
    }
}

fn schedule_matches(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let timezone = parse_timezone(&schedule.timezone).unwrap_or_else(|| {
        warn!(
            "调度 {} 的时区无法识别: {:?}，按UTC处理",
            schedule.id, schedule.timezone
        );
        ScheduleTimezone::Fixed(utc_offset())
    });
    let local = timezone.local(now);

    if !day_matches(&schedule.days, local.weekday()) {
        return false;
    }

    let time = NaiveTime::from_hms_opt(local.hour(), local.minute(), local.second())
        .unwrap_or(NaiveTime::MIN);
    schedule.start_time <= time && time <= schedule.end_time
}

fn day_matches(days: &str, weekday: Weekday) -> bool {
    let days = days.trim();
    if days == "*" {
        return true;
    }

    let expected = weekday_abbreviation(weekday);
    days.split(|c| c == ',' || c == ' ')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .any(|d| {
            d.get(..3)
                .map(|prefix| prefix.eq_ignore_ascii_case(expected))
                .unwrap_or(false)
        })
}

fn weekday_abbreviation(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// 调度的时区，命名时区随夏令时变化
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleTimezone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl ScheduleTimezone {
    /// `now` 在该时区的本地时间
    pub fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Named(tz) => now.with_timezone(tz).naive_local(),
            Self::Fixed(offset) => now.with_timezone(offset).naive_local(),
        }
    }
}

/// IANA 时区名（如 `Australia/Melbourne`），或 `UTC`、`Z`、`+HH:MM` / `-HHMM` 形式的固定偏移
pub fn parse_timezone(timezone: &str) -> Option<ScheduleTimezone> {
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return Some(ScheduleTimezone::Fixed(utc_offset()));
    }
    if let Ok(named) = tz.parse::<Tz>() {
        return Some(ScheduleTimezone::Named(named));
    }

    parse_offset(tz).map(ScheduleTimezone::Fixed)
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz
        .strip_prefix("UTC")
        .or_else(|| tz.strip_prefix("utc"))
        .unwrap_or(tz);
    let (sign, rest) = match tz.chars().next()? {
        '+' => (1, &tz[1..]),
        '-' => (-1, &tz[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };

    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(id: i64, parameter: &str, value: &str, priority: i32, start: (u32, u32), end: (u32, u32)) -> Schedule {
        Schedule {
            id,
            instance_id: 1,
            parameter: parameter.to_string(),
            value: Some(value.to_string()),
            days: "*".to_string(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            timezone: "UTC".to_string(),
            priority,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        // 2024-01-01 是星期一
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_highest_priority_wins() {
        let evaluator = ScheduleEvaluator::new(vec![
            schedule(1, "concurrency", "2", 10, (0, 0), (23, 59)),
            schedule(2, "concurrency", "8", 50, (9, 0), (17, 0)),
        ]);

        assert_eq!(evaluator.active_value("concurrency", at(12, 0)).as_deref(), Some("8"));
        assert_eq!(evaluator.active_value("concurrency", at(18, 0)).as_deref(), Some("2"));
    }

    #[test]
    fn test_priority_tie_breaks_on_earliest_start() {
        let evaluator = ScheduleEvaluator::new(vec![
            schedule(1, "concurrency", "late", 10, (10, 0), (20, 0)),
            schedule(2, "concurrency", "early", 10, (8, 0), (20, 0)),
        ]);
        assert_eq!(evaluator.active_value("concurrency", at(12, 0)).as_deref(), Some("early"));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let evaluator = ScheduleEvaluator::new(vec![schedule(1, "active", "N", 1, (9, 0), (17, 0))]);
        assert!(evaluator.active_schedule("active", at(9, 0)).is_some());
        assert!(evaluator.active_schedule("active", at(17, 0)).is_some());
        assert!(evaluator.active_schedule("active", at(17, 1)).is_none());
    }

    #[test]
    fn test_day_filter() {
        let mut weekend = schedule(1, "active", "N", 1, (0, 0), (23, 59));
        weekend.days = "sat,sun".to_string();
        let evaluator = ScheduleEvaluator::new(vec![weekend]);

        assert!(evaluator.active_schedule("active", at(12, 0)).is_none());
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        assert!(evaluator.active_schedule("active", saturday).is_some());
    }

    #[test]
    fn test_timezone_offset_shifts_window() {
        let mut s = schedule(1, "active", "N", 1, (9, 0), (10, 0));
        s.timezone = "+10:00".to_string();
        let evaluator = ScheduleEvaluator::new(vec![s]);

        // 23:30 UTC 是次日 09:30 (+10:00)
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        assert!(evaluator.active_schedule("active", time).is_some());
        assert!(evaluator.active_schedule("active", at(9, 30)).is_none());
    }

    #[test]
    fn test_default_value_when_nothing_matches() {
        let evaluator = ScheduleEvaluator::default();
        assert_eq!(evaluator.active_value_or("accept", at(1, 0), "Y"), "Y");
    }

    fn fixed(seconds: i32) -> Option<ScheduleTimezone> {
        FixedOffset::east_opt(seconds).map(ScheduleTimezone::Fixed)
    }

    #[test]
    fn test_parse_timezone_forms() {
        assert_eq!(parse_timezone("UTC"), fixed(0));
        assert_eq!(parse_timezone("+1000"), fixed(36000));
        assert_eq!(parse_timezone("-05:30"), fixed(-19800));
        assert_eq!(
            parse_timezone("Europe/London"),
            Some(ScheduleTimezone::Named(chrono_tz::Europe::London))
        );
        assert!(parse_timezone("Mars/Olympus").is_none());
    }

    #[test]
    fn test_named_timezone_follows_daylight_saving() {
        let mut s = schedule(1, "active", "N", 1, (9, 0), (10, 0));
        s.timezone = "Australia/Melbourne".to_string();
        let evaluator = ScheduleEvaluator::new(vec![s]);

        // 一月是夏令时 (+11:00)，22:30 UTC 是次日 09:30
        let summer = Utc.with_ymd_and_hms(2024, 1, 1, 22, 30, 0).unwrap();
        assert!(evaluator.active_schedule("active", summer).is_some());
        let summer_late = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        assert!(evaluator.active_schedule("active", summer_late).is_none());

        // 七月是标准时间 (+10:00)，同一个 UTC 时刻只到 08:30
        let winter_early = Utc.with_ymd_and_hms(2024, 7, 1, 22, 30, 0).unwrap();
        assert!(evaluator.active_schedule("active", winter_early).is_none());
        let winter = Utc.with_ymd_and_hms(2024, 7, 1, 23, 30, 0).unwrap();
        assert!(evaluator.active_schedule("active", winter).is_some());
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let mut s = schedule(1, "active", "N", 1, (9, 0), (10, 0));
        s.timezone = "Mars/Olympus".to_string();
        let evaluator = ScheduleEvaluator::new(vec![s]);
        assert!(evaluator.active_schedule("active", at(9, 30)).is_some());
    }

    #[test]
    fn test_instance_status() {
        let now = at(12, 0);
        let mut instance = ApplicationInstance {
            id: 1,
            application_id: 1,
            name: "demo".to_string(),
            internal_name: "demo".to_string(),
            heartbeat: None,
        };

        let evaluator = ScheduleEvaluator::default();
        assert_eq!(evaluator.instance_status(&instance, now, 10), InstanceStatus::Created);

        instance.heartbeat = Some(now - chrono::Duration::seconds(10));
        assert_eq!(evaluator.instance_status(&instance, now, 10), InstanceStatus::Offline);

        instance.heartbeat = Some(now - chrono::Duration::seconds(3));
        assert_eq!(evaluator.instance_status(&instance, now, 10), InstanceStatus::Online);

        let inactive = ScheduleEvaluator::new(vec![schedule(1, "active", "N", 1, (0, 0), (23, 59))]);
        assert_eq!(inactive.instance_status(&instance, now, 10), InstanceStatus::Inactive);
    }
}
