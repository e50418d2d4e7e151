//! Scheduled update job.
//!
//! The tool manager never writes a crontab itself. It stores *when* the
//! periodic update should run and exposes a [`ScheduleDescriptor`] that
//! describes *what* to run; turning that into a platform scheduler entry is
//! left to the caller.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::ScheduleError;

/// One field of a cron expression: `*` or an explicit list of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    Any,
    Values(Vec<u8>),
}

impl CronField {
    fn parse(raw: &str, field: &'static str, min: u8, max: u8) -> Result<Self, ScheduleError> {
        if raw == "*" {
            return Ok(CronField::Any);
        }
        let invalid = || ScheduleError::InvalidField {
            field,
            value: raw.to_string(),
            min,
            max,
        };
        let mut values = Vec::new();
        for part in raw.split(',') {
            let value: u8 = part.trim().parse().map_err(|_| invalid())?;
            if value < min || value > max {
                return Err(invalid());
            }
            if !values.contains(&value) {
                values.push(value);
            }
        }
        Ok(CronField::Values(values))
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Any => write!(f, "*"),
            CronField::Values(values) => {
                let parts: Vec<String> = values.iter().map(u8::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// A standard five-field cron frequency.
///
/// Only `*` and comma-separated integer lists are accepted, which every cron
/// implementation understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSpec {
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl FromStr for CronSpec {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }
        Ok(CronSpec {
            minute: CronField::parse(fields[0], "minute", 0, 59)?,
            hour: CronField::parse(fields[1], "hour", 0, 23)?,
            day_of_month: CronField::parse(fields[2], "day of month", 1, 31)?,
            month: CronField::parse(fields[3], "month", 1, 12)?,
            day_of_week: CronField::parse(fields[4], "day of week", 0, 6)?,
        })
    }
}

impl TryFrom<String> for CronSpec {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CronSpec> for String {
    fn from(spec: CronSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

/// Persisted state of the scheduled update job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<CronSpec>,
}

impl Schedule {
    /// Sets the frequency and enables the job.
    pub fn set(&mut self, frequency: CronSpec) {
        self.frequency = Some(frequency);
        self.enabled = true;
    }

    /// Enables the job. A frequency must have been set first.
    pub fn enable(&mut self) -> Result<(), ScheduleError> {
        if self.frequency.is_none() {
            return Err(ScheduleError::NoFrequency);
        }
        self.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn clear(&mut self) {
        *self = Schedule::default();
    }

    /// Describes the job to install, or `None` when no frequency is set.
    ///
    /// The command updates every tool and logs to `log_file`. `store` is
    /// passed as `--config` when the job must not use the default store.
    pub fn descriptor(&self, program: &str, store: Option<&Path>, log_file: &Path) -> Option<ScheduleDescriptor> {
        let frequency = self.frequency.clone()?;
        let mut command = vec![program.to_string()];
        if let Some(store) = store {
            command.push("--config".to_string());
            command.push(store.display().to_string());
        }
        command.extend([
            "update".to_string(),
            "--all".to_string(),
            "--log-file".to_string(),
            log_file.display().to_string(),
        ]);
        Some(ScheduleDescriptor {
            enabled: self.enabled,
            frequency,
            command,
        })
    }
}

/// Platform-agnostic description of the scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDescriptor {
    pub enabled: bool,
    pub frequency: CronSpec,
    pub command: Vec<String>,
}

impl fmt::Display for ScheduleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.frequency,
            self.command.join(" "),
            if self.enabled { "enabled" } else { "disabled" }
        )
    }
}
