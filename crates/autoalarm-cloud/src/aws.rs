use crate::error::{CloudError, Result, THROTTLING_CODES};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const MAX_THROTTLE_RETRIES: u32 = 3;

/// Static AWS credentials, usually taken from the Lambda environment.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AwsCredentials {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
        };
        let access_key_id = var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| CloudError::ConfigError("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_access_key = var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| CloudError::ConfigError("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: var("AWS_SESSION_TOKEN"),
        })
    }
}

/// Inputs to one SigV4 signature. `headers` must use lowercase names and
/// include `host` and `x-amz-date`.
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded request path
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub headers: &'a BTreeMap<String, String>,
    pub payload: &'a [u8],
    pub region: &'a str,
    pub service: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// AWS Signature Version 4. Returns the `Authorization` header value.
pub fn sign_v4(credentials: &AwsCredentials, request: &SigningRequest<'_>) -> Result<String> {
    let date = request.timestamp.format("%Y%m%d").to_string();
    let amz_date = amz_date(request.timestamp);

    // Step 1: Build canonical request
    let canonical_uri = request
        .path
        .split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/");
    let canonical_uri = if canonical_uri.is_empty() {
        "/".to_string()
    } else {
        canonical_uri
    };
    let canonical_query = canonical_query(request.query);
    let canonical_headers: String = request
        .headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = request
        .headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");
    let hashed_payload = format!("{:x}", Sha256::digest(request.payload));
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method, canonical_uri, canonical_query, canonical_headers, signed_headers,
        hashed_payload
    );
    let hashed_canonical_request = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

    // Step 2: Build string to sign
    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date, request.region, request.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM, amz_date, credential_scope, hashed_canonical_request
    );

    // Step 3: Derive signing key and sign
    let secret_date = hmac_sha256(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        date.as_bytes(),
    )?;
    let secret_region = hmac_sha256(&secret_date, request.region.as_bytes())?;
    let secret_service = hmac_sha256(&secret_region, request.service.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    // Step 4: Build authorization header
    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, credential_scope, signed_headers, signature
    ))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| CloudError::SigningError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn amz_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y%m%dT%H%M%SZ").to_string()
}

/// RFC 3986 encoding: everything except `A-Za-z0-9-_.~`.
fn uri_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Signed HTTP client for AWS JSON and REST-JSON protocol services.
pub struct AwsClient {
    client: Client,
    credentials: AwsCredentials,
    region: String,
}

impl AwsClient {
    pub fn new(region: &str, credentials: AwsCredentials) -> Result<Self> {
        if region.is_empty() {
            return Err(CloudError::ConfigError("AWS region is empty".into()));
        }
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            region: region.to_string(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn host(&self, endpoint_prefix: &str) -> String {
        format!("{}.{}.amazonaws.com", endpoint_prefix, self.region)
    }

    /// Calls an AWS JSON protocol operation, e.g.
    /// `GraniteServiceVersion20100801.PutMetricAlarm`.
    pub async fn call_json(
        &self,
        service: &str,
        endpoint_prefix: &str,
        target: &str,
        json_version: &str,
        payload: &Value,
    ) -> Result<Value> {
        let body = serde_json::to_vec(payload)?;
        let content_type = format!("application/x-amz-json-{json_version}");
        let extra = [
            ("content-type", content_type.as_str()),
            ("x-amz-target", target),
        ];
        self.send_with_retry(service, endpoint_prefix, Method::POST, "/", &[], &extra, body)
            .await
    }

    /// Calls a REST-JSON operation. `path_segments` are joined and encoded.
    pub async fn call_rest(
        &self,
        service: &str,
        endpoint_prefix: &str,
        method: Method,
        path_segments: &[&str],
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let path = format!(
            "/{}",
            path_segments
                .iter()
                .map(|s| uri_encode(s))
                .collect::<Vec<_>>()
                .join("/")
        );
        const JSON_HEADERS: &[(&str, &str)] = &[("content-type", "application/json")];
        let (payload, extra) = match body {
            Some(value) => (serde_json::to_vec(value)?, JSON_HEADERS),
            None => (Vec::new(), &[][..]),
        };
        self.send_with_retry(service, endpoint_prefix, method, &path, query, extra, payload)
            .await
    }

    /// Retries throttled calls with exponential backoff: 200ms, 400ms, 800ms.
    #[allow(clippy::too_many_arguments)]
    async fn send_with_retry(
        &self,
        service: &str,
        endpoint_prefix: &str,
        method: Method,
        path: &str,
        query: &[(String, String)],
        extra_headers: &[(&str, &str)],
        payload: Vec<u8>,
    ) -> Result<Value> {
        let base_delay = Duration::from_millis(200);
        let mut attempt = 0;
        loop {
            match self
                .send(
                    service,
                    endpoint_prefix,
                    method.clone(),
                    path,
                    query,
                    extra_headers,
                    payload.clone(),
                )
                .await
            {
                Err(e) if e.is_throttling() && attempt < MAX_THROTTLE_RETRIES => {
                    let delay = base_delay * 2_u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "AWS API throttled, retrying"
                    );
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        service: &str,
        endpoint_prefix: &str,
        method: Method,
        path: &str,
        query: &[(String, String)],
        extra_headers: &[(&str, &str)],
        payload: Vec<u8>,
    ) -> Result<Value> {
        let host = self.host(endpoint_prefix);
        let timestamp = Utc::now();

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host.clone());
        headers.insert("x-amz-date".to_string(), amz_date(timestamp));
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }
        for (name, value) in extra_headers {
            headers.insert(name.to_string(), value.to_string());
        }

        let authorization = sign_v4(
            &self.credentials,
            &SigningRequest {
                method: method.as_str(),
                path,
                query,
                headers: &headers,
                payload: &payload,
                region: &self.region,
                service,
                timestamp,
            },
        )?;

        let url = if query.is_empty() {
            format!("https://{host}{path}")
        } else {
            format!("https://{host}{path}?{}", canonical_query(query))
        };

        let mut request = self.client.request(method, &url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .header("authorization", authorization)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(parse_error(service, status, error_type.as_deref(), &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Maps an AWS error response to a [`CloudError`].
fn parse_error(service: &str, status: StatusCode, error_type: Option<&str>, body: &str) -> CloudError {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let field = |names: &[&str]| {
        json.as_ref().and_then(|j| {
            names
                .iter()
                .find_map(|n| j.get(*n).and_then(|v| v.as_str()).map(str::to_string))
        })
    };

    // "com.amazonaws.foo#ThrottlingException" / "ThrottlingException:http://..."
    let code = error_type
        .map(str::to_string)
        .or_else(|| field(&["__type", "code", "Code"]))
        .map(|c| {
            let c = c.rsplit('#').next().unwrap_or(&c).to_string();
            c.split(':').next().unwrap_or(&c).to_string()
        });
    let message = field(&["message", "Message"]).unwrap_or_else(|| body.to_string());

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || code
            .as_deref()
            .is_some_and(|c| THROTTLING_CODES.contains(&c));
    if throttled {
        return CloudError::Throttled {
            service: service.to_string(),
        };
    }

    if status == StatusCode::NOT_FOUND
        || code
            .as_deref()
            .is_some_and(|c| c == "ResourceNotFoundException" || c == "ResourceNotFound")
    {
        return CloudError::NotFound {
            service: service.to_string(),
            message,
        };
    }

    match code {
        Some(code) => CloudError::ApiResponseError {
            service: service.to_string(),
            code,
            message,
        },
        None => CloudError::HttpError {
            service: service.to_string(),
            status: status.as_u16(),
            body: body.to_string(),
        },
    }
}
