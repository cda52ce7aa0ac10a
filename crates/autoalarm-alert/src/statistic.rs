use serde::{Deserialize, Serialize};

/// Extended statistic families that take percentage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtendedFamily {
    Percentile,
    TrimmedMean,
    TrimmedCount,
    TrimmedSum,
    WinsorizedMean,
}

impl ExtendedFamily {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "p" => Some(Self::Percentile),
            "tm" => Some(Self::TrimmedMean),
            "tc" => Some(Self::TrimmedCount),
            "ts" => Some(Self::TrimmedSum),
            "wm" => Some(Self::WinsorizedMean),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Percentile => "p",
            Self::TrimmedMean => "tm",
            Self::TrimmedCount => "tc",
            Self::TrimmedSum => "ts",
            Self::WinsorizedMean => "wm",
        }
    }

    fn supports_range(&self) -> bool {
        !matches!(self, Self::Percentile)
    }
}

/// A CloudWatch statistic: one of the five standard aggregates or an
/// extended statistic.
///
/// `Display` yields the canonical token sent to CloudWatch.
///
/// # Examples
///
/// ```
/// use autoalarm_alert::statistic::{resolve_statistic, Statistic};
///
/// let s = resolve_statistic("tm10:90", &Statistic::Average);
/// assert_eq!(s.to_string(), "TM(10:90)");
/// assert!(s.is_extended());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statistic {
    SampleCount,
    Average,
    Sum,
    Minimum,
    Maximum,
    /// Single-parameter form, e.g. `p90`, `tm90`
    Extended { family: ExtendedFamily, value: f64 },
    /// Two-parameter range form, e.g. `TM(10:90)`
    ExtendedRange {
        family: ExtendedFamily,
        low: f64,
        high: f64,
    },
    /// Interquartile mean, equivalent to `TM(25%:75%)`
    InterquartileMean,
}

const STANDARD: [Statistic; 5] = [
    Statistic::SampleCount,
    Statistic::Average,
    Statistic::Sum,
    Statistic::Minimum,
    Statistic::Maximum,
];

impl Statistic {
    /// Whether CloudWatch expects this in `ExtendedStatistic` rather than
    /// `Statistic`.
    pub fn is_extended(&self) -> bool {
        !STANDARD.contains(self)
    }
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SampleCount => write!(f, "SampleCount"),
            Self::Average => write!(f, "Average"),
            Self::Sum => write!(f, "Sum"),
            Self::Minimum => write!(f, "Minimum"),
            Self::Maximum => write!(f, "Maximum"),
            Self::Extended { family, value } => write!(f, "{}{}", family.prefix(), value),
            Self::ExtendedRange { family, low, high } => {
                write!(f, "{}({}:{})", family.prefix().to_uppercase(), low, high)
            }
            Self::InterquartileMean => write!(f, "IQM"),
        }
    }
}

/// Resolves a statistic token, falling back to `default` when the token is
/// not a valid standard or extended statistic.
pub fn resolve_statistic(token: &str, default: &Statistic) -> Statistic {
    parse_statistic(token).unwrap_or_else(|| default.clone())
}

/// Parses a statistic token case-insensitively. Returns `None` for anything
/// that is not a well-formed statistic.
pub fn parse_statistic(token: &str) -> Option<Statistic> {
    let token = token.trim().to_lowercase();
    if token.is_empty() {
        return None;
    }

    if token == "iqm" {
        return Some(Statistic::InterquartileMean);
    }

    if let Some(standard) = STANDARD
        .iter()
        .find(|s| s.to_string().eq_ignore_ascii_case(&token))
    {
        return Some(standard.clone());
    }

    let prefix = if token.starts_with('p') {
        "p"
    } else {
        token.get(..2)?
    };
    let family = ExtendedFamily::from_prefix(prefix)?;

    let body: String = token[prefix.len()..]
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '%'))
        .collect();
    let params = body
        .split([':', ','])
        .map(|p| p.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()?;

    match params.as_slice() {
        [value] if in_percent_range(*value) => Some(Statistic::Extended {
            family,
            value: *value,
        }),
        [low, high]
            if family.supports_range()
                && in_percent_range(*low)
                && in_percent_range(*high)
                && low < high =>
        {
            Some(Statistic::ExtendedRange {
                family,
                low: *low,
                high: *high,
            })
        }
        _ => None,
    }
}

fn in_percent_range(value: f64) -> bool {
    (0.0..=100.0).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_standard_statistics_to_canonical_case() {
        assert_eq!(parse_statistic("average"), Some(Statistic::Average));
        assert_eq!(parse_statistic("MAXIMUM"), Some(Statistic::Maximum));
        assert_eq!(parse_statistic("samplecount"), Some(Statistic::SampleCount));
        assert_eq!(
            parse_statistic("samplecount").map(|s| s.to_string()),
            Some("SampleCount".to_string())
        );
    }

    #[test]
    fn percentile_is_case_insensitive() {
        let lower = resolve_statistic("p90", &Statistic::Average);
        let upper = resolve_statistic("P90", &Statistic::Average);
        assert_eq!(lower, upper);
        assert_eq!(lower.to_string(), "p90");
        assert_eq!(resolve_statistic("p99.9", &Statistic::Average).to_string(), "p99.9");
    }

    #[test]
    fn trimmed_mean_range_is_canonicalised() {
        for token in ["tm10:90", "TM(10%:90%)", "tm(10,90)", "tm 10 : 90"] {
            let stat = resolve_statistic(token, &Statistic::Average);
            assert_eq!(
                stat,
                Statistic::ExtendedRange {
                    family: ExtendedFamily::TrimmedMean,
                    low: 10.0,
                    high: 90.0,
                },
                "token {token}"
            );
            assert_eq!(stat.to_string(), "TM(10:90)");
        }
    }

    #[test]
    fn single_parameter_families() {
        assert_eq!(resolve_statistic("wm50", &Statistic::Sum).to_string(), "wm50");
        assert_eq!(resolve_statistic("tc90", &Statistic::Sum).to_string(), "tc90");
        assert_eq!(resolve_statistic("ts(80)", &Statistic::Sum).to_string(), "ts80");
        assert_eq!(
            resolve_statistic("iqm", &Statistic::Sum),
            Statistic::InterquartileMean
        );
        assert_eq!(Statistic::InterquartileMean.to_string(), "IQM");
    }

    #[test]
    fn invalid_tokens_fall_back_to_default() {
        let default = Statistic::Maximum;
        for token in [
            "bogus", "", "p", "p101", "p-1", "pabc", "tm90:10", "tm10:10", "tm10:20:30",
            "p10:90", "tm(10:)", "xx50", "pnan", "wm150",
        ] {
            assert_eq!(resolve_statistic(token, &default), default, "token {token:?}");
        }
    }

    #[test]
    fn extended_flag_separates_statistic_fields() {
        assert!(!Statistic::Average.is_extended());
        assert!(!Statistic::SampleCount.is_extended());
        assert!(Statistic::InterquartileMean.is_extended());
        assert!(parse_statistic("p50").is_some_and(|s| s.is_extended()));
        assert!(parse_statistic("tm(5:95)").is_some_and(|s| s.is_extended()));
    }
}
