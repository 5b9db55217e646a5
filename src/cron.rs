//! Minimal cron-expression evaluator covering `*/N * * * *` and
//! `0 H * * *`, in place of a general-purpose cron library. Evaluated in
//! server-local time, fixed at UTC+7.

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Utc};
use thiserror::Error;

const LOCAL_OFFSET_SECONDS: i32 = 7 * 3600;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("unsupported cron expression `{0}`, expected `*/N * * * *` or `0 H * * *`")]
    Unsupported(String),
}

/// The two shapes the worker's scheduling actually needs, nothing more general.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CronSchedule {
    EveryNMinutes(u32),
    DailyAt { hour: u32 },
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::Unsupported(expr.to_string()));
        }
        let [minute, hour, dom, month, dow] = [fields[0], fields[1], fields[2], fields[3], fields[4]];

        if dom != "*" || month != "*" || dow != "*" {
            return Err(CronError::Unsupported(expr.to_string()));
        }

        if hour == "*" {
            if let Some(n) = minute.strip_prefix("*/") {
                let n: u32 = n.parse().map_err(|_| CronError::Unsupported(expr.to_string()))?;
                if n == 0 {
                    return Err(CronError::Unsupported(expr.to_string()));
                }
                return Ok(CronSchedule::EveryNMinutes(n));
            }
        } else if minute == "0" {
            let h: u32 = hour.parse().map_err(|_| CronError::Unsupported(expr.to_string()))?;
            if h > 23 {
                return Err(CronError::Unsupported(expr.to_string()));
            }
            return Ok(CronSchedule::DailyAt { hour: h });
        }

        Err(CronError::Unsupported(expr.to_string()))
    }

    /// The next UTC instant, strictly after `from`, at which this schedule
    /// fires. Computed in server-local (UTC+7) wall-clock time.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECONDS).expect("fixed +7h offset is valid");
        let local = from.with_timezone(&offset);

        let candidate = match self {
            CronSchedule::EveryNMinutes(n) => {
                let n = (*n).max(1) as i64;
                let mut c = local
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .expect("zeroing seconds/nanos never overflows a valid datetime");
                if c <= local {
                    c += Duration::minutes(1);
                }
                while (c.minute() as i64) % n != 0 {
                    c += Duration::minutes(1);
                }
                c
            }
            CronSchedule::DailyAt { hour } => {
                let today = offset
                    .with_ymd_and_hms(local.year(), local.month(), local.day(), *hour, 0, 0)
                    .single()
                    .expect("valid local calendar date and hour");
                if today <= local {
                    today + Duration::days(1)
                } else {
                    today
                }
            }
        };

        candidate.with_timezone(&Utc)
    }
}
