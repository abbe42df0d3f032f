//! Time providers.
//!
//! Every provider is a [`TimeProbe`]: one request, one server-reported
//! timestamp. Providers differ only in where they ask and how they read the
//! answer, so the synchronizer can treat them as a flat ordered list.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{CACHE_CONTROL, DATE, PRAGMA};
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::error::ProbeError;

const CACHE_BUSTER_QUERY: &str = "t";
const NO_CACHE: &str = "no-cache, no-store";

/// Field names carrying an ISO-8601 timestamp in the default providers' JSON.
pub const DEFAULT_TIME_FIELDS: [&str; 2] = ["datetime", "dateTime"];

/// A single source of "true" time.
#[async_trait]
pub trait TimeProbe: Send + Sync {
    /// Human readable origin of the reading, used in logs and [`SyncOutcome`](crate::SyncOutcome).
    fn source(&self) -> &str;

    /// Ask the provider for its current time in milliseconds since the UNIX epoch.
    ///
    /// Returns once the response has been fully read and parsed. The
    /// synchronizer times the whole call, so the parse counts towards the
    /// round trip and is kept to a single small document or header.
    async fn server_time_ms(&self) -> Result<i64, ProbeError>;
}

/// GET a JSON document and read an ISO-8601 timestamp from one of several fields.
#[derive(Debug, Clone)]
pub struct JsonTimeProbe {
    http: Client,
    url: Url,
    fields: Vec<String>,
    timeout: Option<Duration>,
}

impl JsonTimeProbe {
    /// Probe `url`, looking for the first present field out of `fields`.
    pub fn new<I, S>(http: Client, url: Url, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            http,
            url,
            fields: fields.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// Probe `url` with the [`DEFAULT_TIME_FIELDS`].
    pub fn with_default_fields(http: Client, url: Url) -> Self {
        Self::new(http, url, DEFAULT_TIME_FIELDS)
    }

    /// Give up on the request after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request_url(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair(
            CACHE_BUSTER_QUERY,
            &Utc::now().timestamp_millis().to_string(),
        );
        url
    }
}

#[async_trait]
impl TimeProbe for JsonTimeProbe {
    fn source(&self) -> &str {
        self.url.as_str()
    }

    async fn server_time_ms(&self) -> Result<i64, ProbeError> {
        let mut request = self
            .http
            .get(self.request_url())
            .header(CACHE_CONTROL, NO_CACHE)
            .header(PRAGMA, "no-cache");
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;

        read_json_time(&body, &self.fields)
    }
}

/// HEAD an origin and read its `Date` response header.
///
/// The status code is not inspected: any response carrying a `Date` header is
/// a usable reading.
#[derive(Debug, Clone)]
pub struct DateHeaderProbe {
    http: Client,
    origin: Url,
    timeout: Option<Duration>,
}

impl DateHeaderProbe {
    pub fn new(http: Client, origin: Url) -> Self {
        Self {
            http,
            origin,
            timeout: None,
        }
    }

    /// Give up on the request after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl TimeProbe for DateHeaderProbe {
    fn source(&self) -> &str {
        self.origin.as_str()
    }

    async fn server_time_ms(&self) -> Result<i64, ProbeError> {
        let mut request = self
            .http
            .head(self.origin.clone())
            .header(CACHE_CONTROL, NO_CACHE)
            .header(PRAGMA, "no-cache");
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let date = response
            .headers()
            .get(DATE)
            .ok_or(ProbeError::MissingDateHeader)?;
        let date = date.to_str().map_err(|_| {
            ProbeError::InvalidTimestamp(String::from_utf8_lossy(date.as_bytes()).into_owned())
        })?;

        parse_http_date_ms(date)
    }
}

/// Read the first present string field out of `fields` and parse it as ISO-8601.
pub fn read_json_time<S: AsRef<str>>(body: &[u8], fields: &[S]) -> Result<i64, ProbeError> {
    let document: Value = serde_json::from_slice(body)?;
    let raw = fields
        .iter()
        .filter_map(|field| {
            let field: &str = field.as_ref();
            document.get(field)
        })
        .filter_map(Value::as_str)
        .find(|raw| !raw.is_empty())
        .ok_or(ProbeError::MissingField)?;

    parse_iso8601_ms(raw)
}

/// Parse an ISO-8601 date-time into epoch milliseconds.
///
/// Values with an offset are read as RFC 3339. Values without one are taken
/// to be UTC, which is what the UTC-zone endpoints mean by them.
pub fn parse_iso8601_ms(raw: &str) -> Result<i64, ProbeError> {
    let raw = raw.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Ok(datetime.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp_millis())
        .map_err(|_| ProbeError::InvalidTimestamp(raw.to_string()))
}

/// Parse an RFC 7231 HTTP-date (`Tue, 15 Nov 1994 08:12:31 GMT`) into epoch milliseconds.
pub fn parse_http_date_ms(raw: &str) -> Result<i64, ProbeError> {
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|datetime| datetime.timestamp_millis())
        .map_err(|_| ProbeError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    const NOON_250: i64 = 1_709_294_400_250;

    #[rstest]
    #[case("2024-03-01T12:00:00.250+00:00")]
    #[case("2024-03-01T12:00:00.250Z")]
    #[case("2024-03-01T12:00:00.250000+00:00")]
    #[case("2024-03-01T14:00:00.25+02:00")]
    #[case("2024-03-01T12:00:00.2500000")]
    #[case(" 2024-03-01T12:00:00.25 ")]
    fn iso8601_variants(#[case] raw: &str) {
        assert_eq!(parse_iso8601_ms(raw).unwrap(), NOON_250);
    }

    #[test]
    fn iso8601_without_fraction() {
        assert_eq!(
            parse_iso8601_ms("2024-03-01T12:00:00").unwrap(),
            NOON_250 - 250
        );
    }

    #[test]
    fn iso8601_garbage() {
        assert!(matches!(
            parse_iso8601_ms("yesterday"),
            Err(ProbeError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn http_date() {
        assert_eq!(
            parse_http_date_ms("Tue, 15 Nov 1994 08:12:31 GMT").unwrap(),
            784_887_151_000
        );
        assert!(parse_http_date_ms("15/11/1994").is_err());
    }

    #[test]
    fn json_field_lookup_order() {
        let body = br#"{"dateTime":"2024-03-01T12:00:00.2500000","timeZone":"UTC"}"#;
        assert_eq!(read_json_time(body, &DEFAULT_TIME_FIELDS).unwrap(), NOON_250);

        let body = br#"{"datetime":"2024-03-01T12:00:00.250+00:00","dateTime":"garbage"}"#;
        assert_eq!(read_json_time(body, &DEFAULT_TIME_FIELDS).unwrap(), NOON_250);
    }

    #[test]
    fn json_missing_field() {
        let body = br#"{"unixtime":1709294400}"#;
        assert!(matches!(
            read_json_time(body, &DEFAULT_TIME_FIELDS),
            Err(ProbeError::MissingField)
        ));
        let body = br#"{"datetime":""}"#;
        assert!(matches!(
            read_json_time(body, &DEFAULT_TIME_FIELDS),
            Err(ProbeError::MissingField)
        ));
    }

    #[test]
    fn json_not_json() {
        assert!(matches!(
            read_json_time(b"<html>", &DEFAULT_TIME_FIELDS),
            Err(ProbeError::Json(_))
        ));
    }

    fn http_response(status: &str, headers: &[&str], body: &str) -> String {
        let mut response = format!("HTTP/1.1 {status}\r\n");
        for header in headers {
            response.push_str(header);
            response.push_str("\r\n");
        }
        response.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        response
    }

    /// Answer exactly one request with `response`; the task yields the raw request.
    async fn serve_once(response: String) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_lowercase()
        });
        let url = Url::parse(&format!("http://{addr}/api/time?zone=UTC")).unwrap();
        (url, task)
    }

    fn client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn json_probe_reads_time_and_bypasses_cache() {
        let body = r#"{"datetime":"2024-03-01T12:00:00.250+00:00"}"#;
        let (url, server) = serve_once(http_response(
            "200 OK",
            &["Content-Type: application/json"],
            body,
        ))
        .await;

        let probe = JsonTimeProbe::with_default_fields(client(), url)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(probe.server_time_ms().await.unwrap(), NOON_250);

        let request = server.await.unwrap();
        assert!(request.starts_with("get /api/time?zone=utc&t="));
        assert!(request.contains("cache-control: no-cache, no-store"));
        assert!(request.contains("pragma: no-cache"));
    }

    #[tokio::test]
    async fn json_probe_rejects_error_status() {
        let (url, server) =
            serve_once(http_response("500 Internal Server Error", &[], "oops")).await;

        let probe = JsonTimeProbe::with_default_fields(client(), url);
        assert!(matches!(
            probe.server_time_ms().await,
            Err(ProbeError::Status(500))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn date_header_probe() {
        let (url, server) = serve_once(http_response(
            "404 Not Found",
            &["Date: Tue, 15 Nov 1994 08:12:31 GMT"],
            "",
        ))
        .await;

        let probe = DateHeaderProbe::new(client(), url);
        assert_eq!(probe.server_time_ms().await.unwrap(), 784_887_151_000);
        assert!(server.await.unwrap().starts_with("head /api/time"));
    }

    #[tokio::test]
    async fn transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let probe = JsonTimeProbe::with_default_fields(client(), url);
        assert!(matches!(
            probe.server_time_ms().await,
            Err(ProbeError::Http(_))
        ));
    }
}
