//! AWS integrations for AutoAlarm.
//!
//! [`aws::AwsClient`] signs requests with SigV4 and speaks both the AWS JSON
//! and REST-JSON protocols. The service seams ([`cloudwatch::CloudWatchApi`],
//! [`prometheus::PrometheusRulesApi`], [`tagging::TagSource`],
//! [`batch::BatchSink`]) are traits so the reconcilers can run against
//! in-memory fakes.

pub mod aws;
pub mod batch;
pub mod cloudwatch;
pub mod error;
pub mod prometheus;
pub mod retry;
pub mod tagging;

pub use aws::{AwsClient, AwsCredentials};
pub use error::{CloudError, Result};
