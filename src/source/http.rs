//! HTTP data source

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::DataSource;
use crate::config::SourceConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::{FetchTask, Page, ReportSummary, Row};

/// Reads pages from `{base_url}/{data_path}?pagesize=N&startFrom=M`
///
/// The page body is either `{"columns": [...], "rows": [[...], ...]}` or an
/// array of flat objects whose keys, in document order, become the columns.
#[derive(Clone, Debug)]
pub struct HttpDataSource {
    client: reqwest::Client,
    data_url: Url,
    summary_url: Url,
}

impl HttpDataSource {
    /// Build a source from endpoint settings
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::config("source", format!("failed to build HTTP client: {e}")))?;
        Self::with_client(client, config)
    }

    /// Build a source around an existing client
    pub fn with_client(client: reqwest::Client, config: &SourceConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| Error::config("source.base_url", e.to_string()))?;
        // Without a trailing slash `join` would replace the last path segment
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let data_url = base
            .join(&config.data_path)
            .map_err(|e| Error::config("source.data_path", e.to_string()))?;
        let summary_url = base
            .join(&config.summary_path)
            .map_err(|e| Error::config("source.summary_path", e.to_string()))?;

        Ok(Self {
            client,
            data_url,
            summary_url,
        })
    }

    async fn get_json(&self, url: Url, offset: u64) -> std::result::Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, offset))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                offset,
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::TimedOut { offset }
            } else {
                FetchError::Decode {
                    offset,
                    message: e.to_string(),
                }
            }
        })
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_page(
        &self,
        report: &str,
        task: FetchTask,
    ) -> std::result::Result<Page, FetchError> {
        let mut url = self.data_url.clone();
        url.query_pairs_mut()
            .append_pair("report", report)
            .append_pair("pagesize", &task.size.to_string())
            .append_pair("startFrom", &task.offset.to_string());

        tracing::trace!(offset = task.offset, size = task.size, %url, "requesting page");
        let body = self.get_json(url, task.offset).await?;
        decode_page(body).map_err(|message| FetchError::Decode {
            offset: task.offset,
            message,
        })
    }

    async fn summary(&self, report: &str) -> std::result::Result<ReportSummary, FetchError> {
        let mut url = self.summary_url.clone();
        url.query_pairs_mut().append_pair("report", report);

        let body = self.get_json(url, 0).await.map_err(|e| FetchError::Summary {
            report: report.to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_value(body).map_err(|e| FetchError::Summary {
            report: report.to_string(),
            message: e.to_string(),
        })
    }
}

fn transport_error(e: reqwest::Error, offset: u64) -> FetchError {
    if e.is_timeout() {
        FetchError::TimedOut { offset }
    } else {
        FetchError::Transport {
            offset,
            message: e.to_string(),
        }
    }
}

/// Decode either page shape into columns and rendered rows
fn decode_page(body: Value) -> std::result::Result<Page, String> {
    match body {
        Value::Object(mut map) if map.contains_key("columns") => {
            let columns: Vec<String> = match map.remove("columns") {
                Some(Value::Array(items)) => items.iter().map(render).collect(),
                _ => return Err("`columns` must be an array".into()),
            };
            let rows = match map.remove("rows") {
                Some(Value::Array(rows)) => rows
                    .into_iter()
                    .map(|row| match row {
                        Value::Array(cells) => Ok(cells.iter().map(render).collect::<Row>()),
                        other => Err(format!("row must be an array, got {}", kind(&other))),
                    })
                    .collect::<std::result::Result<Vec<Row>, String>>()?,
                None | Some(Value::Null) => Vec::new(),
                Some(other) => return Err(format!("`rows` must be an array, got {}", kind(&other))),
            };
            Ok(Page { columns, rows })
        }
        Value::Array(records) => {
            let columns: Vec<String> = match records.first() {
                Some(Value::Object(first)) => first.keys().cloned().collect(),
                Some(other) => return Err(format!("record must be an object, got {}", kind(other))),
                None => return Ok(Page::default()),
            };
            let rows = records
                .iter()
                .map(|record| match record {
                    Value::Object(fields) => Ok(columns
                        .iter()
                        .map(|column| fields.get(column).map(render).unwrap_or_default())
                        .collect::<Row>()),
                    other => Err(format!("record must be an object, got {}", kind(other))),
                })
                .collect::<std::result::Result<Vec<Row>, String>>()?;
            Ok(Page { columns, rows })
        }
        other => Err(format!("unexpected page body: {}", kind(&other))),
    }
}

/// Render a JSON value as cell text; nested values stay JSON
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> SourceConfig {
        SourceConfig {
            base_url: format!("{}/api", server.uri()),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn decodes_columns_and_rows_shape() {
        let page = decode_page(json!({
            "columns": ["id", "name"],
            "rows": [[1, "Ana"], [2, null]]
        }))
        .unwrap();

        assert_eq!(page.columns, vec!["id", "name"]);
        assert_eq!(page.rows, vec![vec!["1", "Ana"], vec!["2", ""]]);
    }

    #[test]
    fn decodes_object_array_in_key_order() {
        let page = decode_page(json!([
            {"employeeId": "0001", "name": "Ana", "organization": {"name": "Acme"}},
            {"employeeId": "0002", "name": "Bo"}
        ]))
        .unwrap();

        assert_eq!(page.columns, vec!["employeeId", "name", "organization"]);
        assert_eq!(page.rows[0][2], r#"{"name":"Acme"}"#);
        assert_eq!(page.rows[1], vec!["0002", "Bo", ""]);
    }

    #[test]
    fn empty_array_is_an_empty_page() {
        assert_eq!(decode_page(json!([])).unwrap(), Page::default());
    }

    #[test]
    fn rejects_scalar_body() {
        assert!(decode_page(json!("nope")).is_err());
        assert!(decode_page(json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn fetch_page_sends_paging_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dataStream/dataTable"))
            .and(query_param("pagesize", "100"))
            .and(query_param("startFrom", "200"))
            .and(query_param("report", "staff"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 200, "name": "Ana"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpDataSource::new(&config(&server)).unwrap();
        let page = source
            .fetch_page("staff", FetchTask::new(200, 100))
            .await
            .unwrap();

        assert_eq!(page.columns, vec!["id", "name"]);
        assert_eq!(page.rows, vec![vec!["200", "Ana"]]);
    }

    #[tokio::test]
    async fn server_error_maps_to_transient_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpDataSource::new(&config(&server)).unwrap();
        let err = source
            .fetch_page("staff", FetchTask::new(0, 10))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { offset: 0, status: 503 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let source = HttpDataSource::new(&config(&server)).unwrap();
        let err = source
            .fetch_page("staff", FetchTask::new(10, 10))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Decode { offset: 10, .. }));
    }

    #[tokio::test]
    async fn summary_is_decoded_from_camel_case() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dataStream/summary"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalRecords": 1234,
                "reportName": "Headcount",
                "criteria": "Active only"
            })))
            .mount(&server)
            .await;

        let source = HttpDataSource::new(&config(&server)).unwrap();
        let summary = source.summary("staff").await.unwrap();

        assert_eq!(summary.total_records, 1234);
        assert_eq!(summary.report_name, "Headcount");
    }

    #[tokio::test]
    async fn summary_failure_names_the_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpDataSource::new(&config(&server)).unwrap();
        let err = source.summary("ghost").await.unwrap_err();

        assert!(matches!(err, FetchError::Summary { ref report, .. } if report == "ghost"));
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let config = SourceConfig {
            base_url: "not a url".into(),
            ..SourceConfig::default()
        };
        let err = HttpDataSource::new(&config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
