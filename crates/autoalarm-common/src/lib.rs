//! Types shared by the AutoAlarm crates: resource identity as produced by
//! service adapters, and the alarm enums understood by CloudWatch.

pub mod types;

/// Tag key prefix every AutoAlarm override tag starts with.
pub const TAG_PREFIX: &str = "autoalarm:";

/// Prefix of every alarm, rule and namespace name AutoAlarm manages.
pub const NAME_PREFIX: &str = "AutoAlarm";
