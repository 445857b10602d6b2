//! Deterministic synthetic data source

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::DataSource;
use crate::error::FetchError;
use crate::types::{FetchTask, Page, ReportSummary, Row};

const COLUMNS: [&str; 10] = [
    "id",
    "employeeId",
    "name",
    "gender",
    "birthdate",
    "city",
    "country",
    "mobile",
    "email",
    "organization",
];

const FIRST_NAMES: [&str; 16] = [
    "Ana", "Bram", "Chloe", "Dmitri", "Elif", "Farid", "Greta", "Hiro", "Ines", "Jonas", "Kaia",
    "Luca", "Mei", "Nils", "Olga", "Pavel",
];

const PLACES: [(&str, &str); 10] = [
    ("Utrecht", "Netherlands"),
    ("Ghent", "Belgium"),
    ("Lyon", "France"),
    ("Porto", "Portugal"),
    ("Graz", "Austria"),
    ("Aarhus", "Denmark"),
    ("Tartu", "Estonia"),
    ("Bologna", "Italy"),
    ("Cork", "Ireland"),
    ("Malmo", "Sweden"),
];

const ORGANIZATIONS: [&str; 6] = [
    "Northwind",
    "Contoso",
    "Fabrikam",
    "Tailspin",
    "Wingtip",
    "Litware",
];

/// Generates employee-like records on demand
///
/// Every row is derived from `seed` and its index alone, so any page can be
/// produced independently and the same request always yields the same bytes.
#[derive(Clone, Debug)]
pub struct SyntheticDataSource {
    total_records: u64,
    seed: u64,
    latency: Option<Duration>,
}

impl SyntheticDataSource {
    /// Source holding `total_records` records generated from `seed`
    pub fn new(total_records: u64, seed: u64) -> Self {
        Self {
            total_records,
            seed,
            latency: None,
        }
    }

    /// Delay each page by up to `latency`, scaled by a per-page random factor
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Column names of every page
    pub fn columns() -> Vec<String> {
        COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    /// Record at `index`
    pub fn row(&self, index: u64) -> Row {
        let mut rng = StdRng::seed_from_u64(self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15));

        let name = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
        let gender = if rng.gen_bool(0.5) { "Female" } else { "Male" };
        let (city, country) = PLACES[rng.gen_range(0..PLACES.len())];
        let organization = ORGANIZATIONS[rng.gen_range(0..ORGANIZATIONS.len())];
        let birthdate = NaiveDate::from_ymd_opt(1965, 1, 1)
            .map(|start| start + ChronoDuration::days(rng.gen_range(0..14_600)))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let mobile = format!("+31 6 {:08}", rng.gen_range(0..100_000_000u32));
        let email = format!(
            "{}.{:010}@{}.example",
            name.to_ascii_lowercase(),
            index,
            organization.to_ascii_lowercase()
        );

        vec![
            index.to_string(),
            format!("{index:010}"),
            name.to_string(),
            gender.to_string(),
            birthdate,
            city.to_string(),
            country.to_string(),
            mobile,
            email,
            organization.to_string(),
        ]
    }
}

#[async_trait]
impl DataSource for SyntheticDataSource {
    async fn fetch_page(&self, _report: &str, task: FetchTask) -> Result<Page, FetchError> {
        if let Some(latency) = self.latency {
            let factor = StdRng::seed_from_u64(self.seed.wrapping_add(task.offset)).gen_range(0.5..=1.0);
            tokio::time::sleep(latency.mul_f64(factor)).await;
        }

        let end = task.end().min(self.total_records);
        let rows = (task.offset.min(end)..end).map(|i| self.row(i)).collect();
        Ok(Page {
            columns: Self::columns(),
            rows,
        })
    }

    async fn summary(&self, report: &str) -> Result<ReportSummary, FetchError> {
        Ok(ReportSummary {
            total_records: self.total_records,
            report_name: format!("Report for: {report}"),
            criteria: format!("Synthetic employees\nSeed {}", self.seed),
        })
    }
}
