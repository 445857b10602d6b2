//! Fixtures: a mock report service and exporter setup

use report_stream::{Config, DeliveryMode, SourceConfig};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate, Respond};

/// Serves `pagesize` records starting at `startFrom`, clipped to `total`
pub struct PageResponder {
    pub total: u64,
}

impl Respond for PageResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .and_then(|(_, value)| value.parse::<u64>().ok())
        };
        let (Some(size), Some(start)) = (param("pagesize"), param("startFrom")) else {
            return ResponseTemplate::new(400);
        };

        let end = (start + size).min(self.total);
        let records: Vec<serde_json::Value> = (start.min(end)..end)
            .map(|i| {
                json!({
                    "employeeId": format!("E{i:06}"),
                    "name": format!("Employee {i}"),
                    "salary": 30_000 + i * 10,
                    "organization": {"name": "Northwind"},
                })
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(records)
    }
}

/// Start a mock report service holding `total` records
pub async fn mount_report_server(total: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/dataStream/dataTable"))
        .respond_with(PageResponder { total })
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/dataStream/summary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalRecords": total,
            "reportName": "Payroll",
            "criteria": "All departments\nActive staff only",
        })))
        .mount(&server)
        .await;

    server
}

/// Source settings pointing at `server`
pub fn source_config(server: &MockServer) -> SourceConfig {
    SourceConfig {
        base_url: format!("{}/api", server.uri()),
        ..SourceConfig::default()
    }
}

/// Config with `workers` workers and a 100-record first page
pub fn export_config(workers: usize, delivery: DeliveryMode) -> Config {
    let mut config = Config::default();
    config.pipeline.workers = workers;
    config.pipeline.delivery = delivery;
    config
}
