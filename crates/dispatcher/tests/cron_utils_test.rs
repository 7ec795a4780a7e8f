use chrono::{TimeZone, Utc};
use taskbus_dispatcher::{cron_utils::parse_timezone, CronScheduler};

#[test]
fn test_local_time_preserved_across_dst() {
    // 纽约2024-03-10切换夏令时，本地09:00对应的UTC时间提前一小时
    let scheduler = CronScheduler::with_timezone("0 9 * * *", "America/New_York").unwrap();
    let from = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();

    let times = scheduler.upcoming_times(from, 2);
    assert_eq!(
        times,
        vec![
            Utc.with_ymd_and_hms(2024, 3, 9, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap(),
        ]
    );
}

#[test]
fn test_six_field_expression_with_seconds() {
    let scheduler = CronScheduler::new("*/15 * * * * *").unwrap();
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
    assert_eq!(
        scheduler.next_execution_time(from),
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 15).unwrap())
    );
}

#[test]
fn test_parse_timezone() {
    assert_eq!(parse_timezone("UTC").unwrap(), chrono_tz::UTC);
    assert!(parse_timezone("").is_err());
}
