//! Per-service metric alarm tables, ordered by tag key.

pub mod ec2;
pub mod sqs;

use crate::options::MetricAlarmOptions;
use crate::statistic::Statistic;
use autoalarm_common::types::{ComparisonOperator, MissingDataTreatment};

/// Shorthand used by the service tables.
#[allow(clippy::too_many_arguments)]
pub(crate) fn defaults(
    warning: Option<f64>,
    critical: Option<f64>,
    period: u32,
    evaluation_periods: u32,
    statistic: Statistic,
    datapoints_to_alarm: u32,
    comparison_operator: ComparisonOperator,
    missing_data_treatment: MissingDataTreatment,
) -> MetricAlarmOptions {
    MetricAlarmOptions {
        warning_threshold: warning,
        critical_threshold: critical,
        period,
        evaluation_periods,
        statistic,
        datapoints_to_alarm,
        comparison_operator,
        missing_data_treatment,
    }
}
