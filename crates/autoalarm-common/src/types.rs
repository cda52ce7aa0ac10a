use serde::{Deserialize, Serialize};

/// A CloudWatch metric dimension (`Name`/`Value` pair).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A disk path on a resource that gets its own alarm for per-volume metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    /// Mount path or drive letter (e.g., `/`, `/data`, `C:`)
    pub path: String,
    /// Extra dimensions appended to the resource's own dimensions
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// Identity of one monitored resource, produced by a service adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Service short name used in alarm names (e.g., `"EC2"`, `"SQS"`)
    pub service: String,
    /// Resource ID or ARN-derived name (e.g., `"i-0abc123"`)
    pub service_identifier: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub storage: Vec<StorageVolume>,
}

impl ResourceIdentity {
    pub fn new(service: impl Into<String>, service_identifier: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            service_identifier: service_identifier.into(),
            dimensions: Vec::new(),
            storage: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.push(Dimension::new(name, value));
        self
    }

    pub fn with_volume(mut self, volume: StorageVolume) -> Self {
        self.storage.push(volume);
        self
    }
}

/// Alarm classification, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use autoalarm_common::types::Classification;
///
/// let c: Classification = "warning".parse().unwrap();
/// assert_eq!(c, Classification::Warning);
/// assert_eq!(c.to_string(), "Warning");
/// assert_eq!(c.severity_label(), "warning");
/// assert!(Classification::Critical > Classification::Warning);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Classification {
    Warning,
    Critical,
}

impl Classification {
    pub const ALL: [Classification; 2] = [Classification::Warning, Classification::Critical];

    /// Lowercase form used for Prometheus `severity` labels.
    pub fn severity_label(&self) -> &'static str {
        match self {
            Classification::Warning => "warning",
            Classification::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Warning => write!(f, "Warning"),
            Classification::Critical => write!(f, "Critical"),
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" => Ok(Classification::Warning),
            "critical" => Ok(Classification::Critical),
            _ => Err(format!("unknown classification: {s}")),
        }
    }
}

/// Which alarm workflow produced an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmVariant {
    Static,
    Anomaly,
}

impl std::fmt::Display for AlarmVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmVariant::Static => write!(f, "static"),
            AlarmVariant::Anomaly => write!(f, "anomaly"),
        }
    }
}

/// CloudWatch alarm comparison operators.
///
/// Parsing is case-insensitive; display uses the canonical API spelling.
///
/// # Examples
///
/// ```
/// use autoalarm_common::types::ComparisonOperator;
///
/// let op: ComparisonOperator = "greaterthanthreshold".parse().unwrap();
/// assert_eq!(op, ComparisonOperator::GreaterThanThreshold);
/// assert_eq!(op.to_string(), "GreaterThanThreshold");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThanOrEqualToThreshold,
    GreaterThanThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
    LessThanLowerOrGreaterThanUpperThreshold,
    LessThanLowerThreshold,
    GreaterThanUpperThreshold,
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 7] = [
        ComparisonOperator::GreaterThanOrEqualToThreshold,
        ComparisonOperator::GreaterThanThreshold,
        ComparisonOperator::LessThanThreshold,
        ComparisonOperator::LessThanOrEqualToThreshold,
        ComparisonOperator::LessThanLowerOrGreaterThanUpperThreshold,
        ComparisonOperator::LessThanLowerThreshold,
        ComparisonOperator::GreaterThanUpperThreshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreaterThanOrEqualToThreshold => "GreaterThanOrEqualToThreshold",
            Self::GreaterThanThreshold => "GreaterThanThreshold",
            Self::LessThanThreshold => "LessThanThreshold",
            Self::LessThanOrEqualToThreshold => "LessThanOrEqualToThreshold",
            Self::LessThanLowerOrGreaterThanUpperThreshold => {
                "LessThanLowerOrGreaterThanUpperThreshold"
            }
            Self::LessThanLowerThreshold => "LessThanLowerThreshold",
            Self::GreaterThanUpperThreshold => "GreaterThanUpperThreshold",
        }
    }

    /// PromQL binary operator for fixed-threshold operators. Band operators
    /// only make sense for anomaly detection and have no PromQL form.
    pub fn promql(&self) -> Option<&'static str> {
        match self {
            Self::GreaterThanOrEqualToThreshold => Some(">="),
            Self::GreaterThanThreshold => Some(">"),
            Self::LessThanThreshold => Some("<"),
            Self::LessThanOrEqualToThreshold => Some("<="),
            Self::LessThanLowerOrGreaterThanUpperThreshold
            | Self::LessThanLowerThreshold
            | Self::GreaterThanUpperThreshold => None,
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown comparison operator: {s}"))
    }
}

/// How CloudWatch treats missing datapoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingDataTreatment {
    Missing,
    Ignore,
    Breaching,
    NotBreaching,
}

impl MissingDataTreatment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Ignore => "ignore",
            Self::Breaching => "breaching",
            Self::NotBreaching => "notBreaching",
        }
    }
}

impl std::fmt::Display for MissingDataTreatment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MissingDataTreatment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "missing" => Ok(Self::Missing),
            "ignore" => Ok(Self::Ignore),
            "breaching" => Ok(Self::Breaching),
            "notbreaching" => Ok(Self::NotBreaching),
            _ => Err(format!("unknown missing data treatment: {s}")),
        }
    }
}
