// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::schedule::{Schedule, TriggerType};
use crate::utils::errors::ScheduleError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// 已解析的cron表达式
///
/// 接受标准五段式（分 时 日 月 周），也接受带秒的六段或七段式
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    /// 原始表达式
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl FromStr for CronExpression {
    type Err = ScheduleError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let day_of_week =
                    day_of_week_field(fields[4]).map_err(|reason| ScheduleError::InvalidCron {
                        expression: expression.to_string(),
                        reason,
                    })?;
                format!("0 {} {}", fields[..4].join(" "), day_of_week)
            }
            6 | 7 => fields.join(" "),
            count => {
                return Err(ScheduleError::InvalidCron {
                    expression: expression.to_string(),
                    reason: format!("expected 5 to 7 fields, found {count}"),
                })
            }
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: expression.trim().to_string(),
            schedule,
        })
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// 把五段式的星期字段（0-7，0 与 7 都是周日）改写为 cron 库的编号（1-7，1 为周日）
///
/// 星期名称与 `*`、`?` 原样保留；数字项展开为明确的列表
fn day_of_week_field(field: &str) -> Result<String, String> {
    let mut days = BTreeSet::new();
    let mut kept = Vec::new();

    for item in field.split(',') {
        match expand_day_of_week(item)? {
            Some(expanded) => days.extend(expanded.into_iter().map(|day| day + 1)),
            None => kept.push(item.to_string()),
        }
    }

    Ok(days
        .into_iter()
        .map(|day| day.to_string())
        .chain(kept)
        .collect::<Vec<_>>()
        .join(","))
}

/// 展开单个星期项为 0-6 的日期集合，非数字项返回 `None`
fn expand_day_of_week(item: &str) -> Result<Option<Vec<u32>>, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid day-of-week step '{step}'"))?;
            if step == 0 {
                return Err("day-of-week step must be positive".to_string());
            }
            (base, Some(step))
        }
        None => (item, None),
    };

    let (first, last) = match base {
        "*" | "?" => match step {
            // `*` means the same days in both numberings.
            None => return Ok(None),
            Some(_) => (0, 6),
        },
        _ => {
            let (start, end) = match base.split_once('-') {
                Some((start, end)) => (start, Some(end)),
                None => (base, None),
            };
            let Ok(start) = start.parse::<u32>() else {
                return Ok(None);
            };
            let end = match end {
                Some(end) => match end.parse::<u32>() {
                    Ok(end) => end,
                    Err(_) => return Ok(None),
                },
                None if step.is_some() => 6,
                None => start,
            };
            (start, end)
        }
    };

    if first > 7 || last > 7 {
        return Err(format!("day-of-week '{item}' is out of range 0-7"));
    }
    if first > last {
        return Err(format!("day-of-week range '{item}' is reversed"));
    }

    let step = step.unwrap_or(1) as usize;
    Ok(Some(
        (first..=last).step_by(step).map(|day| day % 7).collect(),
    ))
}

/// 计算调度在 `now` 之后的自然触发时间
///
/// CRON 取下一次匹配时间；ONE_TIME 取 `run_at`，缺省时立即到期
pub fn next_occurrence(
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match schedule.trigger_type {
        TriggerType::Cron => {
            let expression = schedule.cron_expression.as_deref().ok_or_else(|| {
                ScheduleError::Validation(vec!["cron_expression required for CRON".to_string()])
            })?;
            Ok(expression.parse::<CronExpression>()?.next_after(now))
        }
        TriggerType::OneTime => Ok(Some(schedule.run_at.unwrap_or(now))),
    }
}
