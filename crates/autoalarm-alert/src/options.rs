use crate::statistic::{resolve_statistic, Statistic};
use autoalarm_common::types::{Classification, ComparisonOperator, MissingDataTreatment};
use serde::{Deserialize, Serialize};

/// Field delimiter of the tag override syntax.
pub const FIELD_DELIMITER: char = '/';

/// Token that explicitly disables a threshold field.
pub const DISABLED_THRESHOLD: &str = "-";

/// Fully resolved alarm options for one metric.
///
/// `warning_threshold` and `critical_threshold` carry two meanings depending
/// on the workflow: for static alarms they are absolute metric values, for
/// anomaly alarms they are the band width in standard deviations passed to
/// `ANOMALY_DETECTION_BAND`. `None` means the classification is not wanted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlarmOptions {
    pub warning_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    /// Seconds per datapoint
    pub period: u32,
    pub evaluation_periods: u32,
    pub statistic: Statistic,
    pub datapoints_to_alarm: u32,
    pub comparison_operator: ComparisonOperator,
    pub missing_data_treatment: MissingDataTreatment,
}

impl MetricAlarmOptions {
    pub fn threshold(&self, classification: Classification) -> Option<f64> {
        match classification {
            Classification::Warning => self.warning_threshold,
            Classification::Critical => self.critical_threshold,
        }
    }

    pub fn has_any_threshold(&self) -> bool {
        self.warning_threshold.is_some() || self.critical_threshold.is_some()
    }
}

/// Serializes to the tag override syntax; the inverse of
/// [`parse_metric_alarm_options`].
impl std::fmt::Display for MetricAlarmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let threshold = |t: Option<f64>| match t {
            Some(v) => v.to_string(),
            None => DISABLED_THRESHOLD.to_string(),
        };
        write!(
            f,
            "{}/{}/{}/{}/{}/{}/{}/{}",
            threshold(self.warning_threshold),
            threshold(self.critical_threshold),
            self.period,
            self.evaluation_periods,
            self.statistic,
            self.datapoints_to_alarm,
            self.comparison_operator,
            self.missing_data_treatment,
        )
    }
}

/// Parses a `/`-delimited override string against a complete set of
/// defaults.
///
/// Field order: warning, critical, period, evaluation periods, statistic,
/// datapoints to alarm, comparison operator, missing data treatment.
/// Missing, empty or malformed fields take the default; `-` in a threshold
/// field disables that classification. Parsing never fails.
///
/// # Examples
///
/// ```
/// use autoalarm_alert::configs::ec2;
/// use autoalarm_alert::options::parse_metric_alarm_options;
///
/// let defaults = ec2::metric_configs()[0].defaults.clone();
/// let opts = parse_metric_alarm_options("-/99", &defaults);
/// assert_eq!(opts.warning_threshold, None);
/// assert_eq!(opts.critical_threshold, Some(99.0));
/// assert_eq!(opts.period, defaults.period);
/// ```
pub fn parse_metric_alarm_options(raw: &str, defaults: &MetricAlarmOptions) -> MetricAlarmOptions {
    let fields: Vec<&str> = raw.split(FIELD_DELIMITER).map(str::trim).collect();
    let field = |index: usize| fields.get(index).copied().unwrap_or("");

    MetricAlarmOptions {
        warning_threshold: parse_threshold(field(0), defaults.warning_threshold),
        critical_threshold: parse_threshold(field(1), defaults.critical_threshold),
        period: parse_count(field(2), defaults.period),
        evaluation_periods: parse_count(field(3), defaults.evaluation_periods),
        statistic: parse_statistic_field(field(4), &defaults.statistic),
        datapoints_to_alarm: parse_count(field(5), defaults.datapoints_to_alarm),
        comparison_operator: field(6)
            .parse()
            .unwrap_or(defaults.comparison_operator),
        missing_data_treatment: field(7)
            .parse()
            .unwrap_or(defaults.missing_data_treatment),
    }
}

fn parse_threshold(value: &str, default: Option<f64>) -> Option<f64> {
    if value == DISABLED_THRESHOLD {
        return None;
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => default,
    }
}

/// Fractions round up; values outside `0..=u32::MAX` are clamped.
fn parse_count(value: &str, default: u32) -> u32 {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => v.ceil().clamp(0.0, f64::from(u32::MAX)) as u32,
        _ => default,
    }
}

fn parse_statistic_field(value: &str, default: &Statistic) -> Statistic {
    if value.is_empty() {
        return default.clone();
    }
    resolve_statistic(&value.to_lowercase(), default)
}

/// Snaps a period to CloudWatch's native granularity: high-resolution
/// periods of 10 or 30 seconds, otherwise a multiple of 60.
///
/// # Examples
///
/// ```
/// use autoalarm_alert::options::normalize_period;
///
/// assert_eq!(normalize_period(5), 10);
/// assert_eq!(normalize_period(40), 30);
/// assert_eq!(normalize_period(61), 120);
/// assert_eq!(normalize_period(120), 120);
/// assert_eq!(normalize_period(u32::MAX), u32::MAX / 60 * 60);
/// ```
pub fn normalize_period(period: u32) -> u32 {
    const MAX_PERIOD: u32 = u32::MAX / 60 * 60;

    if period < 10 {
        10
    } else if period < 46 {
        30
    } else if period > MAX_PERIOD {
        MAX_PERIOD
    } else {
        period.div_ceil(60) * 60
    }
}
