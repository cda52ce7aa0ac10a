use autoalarm_common::types::{AlarmVariant, Classification};
use autoalarm_common::NAME_PREFIX;

/// The tuple that uniquely identifies one managed alarm.
///
/// Two identities that compare equal always produce the same name, which is
/// the only idempotency key CloudWatch offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmIdentity<'a> {
    pub service: &'a str,
    pub service_identifier: &'a str,
    /// Tag key of the metric config (e.g., `"cpu"`)
    pub metric: &'a str,
    pub storage_path: Option<&'a str>,
    pub classification: Classification,
    pub variant: AlarmVariant,
}

impl AlarmIdentity<'_> {
    /// `AutoAlarm-{service}-{id}-{metric}[-{path}]-[anomaly-]{classification}`
    ///
    /// # Examples
    ///
    /// ```
    /// use autoalarm_alert::naming::AlarmIdentity;
    /// use autoalarm_common::types::{AlarmVariant, Classification};
    ///
    /// let id = AlarmIdentity {
    ///     service: "EC2",
    ///     service_identifier: "i-0abc",
    ///     metric: "cpu",
    ///     storage_path: None,
    ///     classification: Classification::Warning,
    ///     variant: AlarmVariant::Static,
    /// };
    /// assert_eq!(id.alarm_name(), "AutoAlarm-EC2-i-0abc-cpu-Warning");
    /// ```
    pub fn alarm_name(&self) -> String {
        let path = self
            .storage_path
            .map(|p| format!("-{p}"))
            .unwrap_or_default();
        let variant = match self.variant {
            AlarmVariant::Static => "",
            AlarmVariant::Anomaly => "anomaly-",
        };
        format!(
            "{}{}{}-{}{}",
            resource_prefix(self.service, self.service_identifier),
            self.metric,
            path,
            variant,
            self.classification,
        )
    }
}

/// Name prefix shared by every alarm of one resource. Ends with `-` so that
/// `i-123` never matches alarms of `i-1234`.
pub fn resource_prefix(service: &str, service_identifier: &str) -> String {
    format!("{NAME_PREFIX}-{service}-{service_identifier}-")
}
