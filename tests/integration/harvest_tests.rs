//! End-to-end harvests against a mock facility site

use crate::common::*;
use facility_harvest::config::{parse_config, Config};
use facility_harvest::harvest::{DetailPageProcessor, FileWorkSource, WorkSource};
use facility_harvest::{ItemStatus, PipelineContext, RunSummary, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn detail_page(name: &str, capacity: &str, reports: &[&str]) -> String {
    let links: String = reports
        .iter()
        .map(|href| format!("<li><a class=\"report\" href=\"{}\">Inspection</a></li>", href))
        .collect();
    format!(
        "<html><body>\
         <h1 class=\"name\">  {}  </h1>\
         <p>Licensed beds: <span class=\"capacity\">{}</span></p>\
         <ul>{}</ul>\
         </body></html>",
        name, capacity, links
    )
}

/// Writes the work list and returns a config pointing everything into `dir`
fn harvest_config(server: &MockServer, dir: &TempDir, ids: &[&str], reports_required: bool) -> Config {
    let source = dir.path().join("facilities.jsonl");
    let lines: String = ids
        .iter()
        .map(|id| format!("{{\"id\": \"{}\", \"county\": \"Kent\"}}\n", id))
        .collect();
    std::fs::write(&source, lines).unwrap();

    let uri = server.uri();
    let checkpoint = log_path(dir).display().to_string();
    let output = csv_path(dir).display().to_string();
    let source = source.display().to_string();
    let reports = dir.path().join("reports").display().to_string();

    let content = format!(
        r#"
[pipeline]
concurrency = 3
progress-every = 1

[retry]
max-attempts = 3
base-delay-ms = 10
max-delay-ms = 20
attempt-timeout-ms = 5000

[checkpoint]
path = '{checkpoint}'

[output]
path = '{output}'

[source]
path = '{source}'

[harvest]
url-template = '{uri}/facility/{{id}}'

[[harvest.field]]
name = "name"
selector = "h1.name"
required = true

[[harvest.field]]
name = "capacity"
selector = "span.capacity"

[harvest.reports]
selector = "a.report"
directory = '{reports}'
required = {reports_required}
"#
    );

    parse_config(&content, |_| None).unwrap()
}

async fn run_harvest(config: &Config) -> RunSummary {
    let items = FileWorkSource::from_config(&config.source).load().await.unwrap();
    let processor = Arc::new(DetailPageProcessor::from_config(config).unwrap());
    let ctx = PipelineContext::from_config(config, None).unwrap();
    Scheduler::new(ctx).run(items, processor).await.unwrap()
}

async fn mount_page(server: &MockServer, id: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/facility/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_harvest_extracts_fields_and_reports() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "FAC-1",
        detail_page("Sunrise   Care", "42", &["/reports/FAC-1/2024-05.pdf"]),
    )
    .await;
    mount_page(&server, "FAC-2", detail_page("Lakeside, Inc.", "", &[])).await;
    Mock::given(method("GET"))
        .and(path("/reports/FAC-1/2024-05.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 report".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let config = harvest_config(&server, &dir, &["FAC-1", "FAC-2", "FAC-404"], true);
    let summary = run_harvest(&config).await;

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    let (header, mut rows) = read_csv(&csv_path(&dir));
    assert_eq!(header, vec!["id", "name", "capacity", "detail_url", "reports"]);
    rows.sort();
    assert_eq!(rows[0][0], "FAC-1");
    assert_eq!(rows[0][1], "Sunrise Care");
    assert_eq!(rows[0][2], "42");
    assert_eq!(rows[0][3], format!("{}/facility/FAC-1", server.uri()));
    assert_eq!(rows[0][4], "2024-05.pdf");
    assert_eq!(rows[1][1], "Lakeside, Inc.");
    assert_eq!(rows[1][2], "");
    assert_eq!(rows[1][4], "");

    let report: PathBuf = dir.path().join("reports").join("FAC-1").join("2024-05.pdf");
    assert_eq!(std::fs::read(report).unwrap(), b"%PDF-1.4 report");

    let failed = reload_log(&dir).get("FAC-404").cloned().unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert!(failed.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_unavailable_page_is_retried() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/facility/FAC-9"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    mount_page(&server, "FAC-9", detail_page("Harbor View", "12", &[])).await;

    let config = harvest_config(&server, &dir, &["FAC-9"], true);
    let summary = run_harvest(&config).await;

    assert_eq!(summary.completed, 1);
    let (_, rows) = read_csv(&csv_path(&dir));
    assert_eq!(rows[0][1], "Harbor View");
}

#[tokio::test]
async fn test_failed_required_report_fails_the_item() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // The report link has no mock, so the server answers 404
    mount_page(
        &server,
        "FAC-3",
        detail_page("Maple House", "8", &["/reports/FAC-3/missing.pdf"]),
    )
    .await;

    let config = harvest_config(&server, &dir, &["FAC-3"], true);
    let summary = run_harvest(&config).await;

    assert_eq!(summary.failed, 1);
    assert!(read_csv(&csv_path(&dir)).1.is_empty());
    let reason = reload_log(&dir).get("FAC-3").cloned().unwrap().error.unwrap();
    assert!(reason.contains("missing.pdf"), "unexpected reason: {}", reason);
}

#[tokio::test]
async fn test_optional_report_failure_keeps_the_item() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "FAC-3",
        detail_page("Maple House", "8", &["/reports/FAC-3/missing.pdf"]),
    )
    .await;

    let config = harvest_config(&server, &dir, &["FAC-3"], false);
    let summary = run_harvest(&config).await;

    assert_eq!(summary.completed, 1);
    let (_, rows) = read_csv(&csv_path(&dir));
    assert_eq!(rows[0][4], "");
}

#[tokio::test]
async fn test_missing_required_field_fails_the_item() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_page(
        &server,
        "FAC-7",
        "<html><body><p>Facility closed</p></body></html>".to_string(),
    )
    .await;

    let config = harvest_config(&server, &dir, &["FAC-7"], true);
    let summary = run_harvest(&config).await;

    assert_eq!(summary.failed, 1);
    let reason = reload_log(&dir).get("FAC-7").cloned().unwrap().error.unwrap();
    assert_eq!(reason, "missing data: required field 'name' not found");
}

#[tokio::test]
async fn test_rerun_fetches_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    for id in ["FAC-1", "FAC-2"] {
        Mock::given(method("GET"))
            .and(path(format!("/facility/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(id, "1", &[])))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = harvest_config(&server, &dir, &["FAC-1", "FAC-2"], true);
    let first = run_harvest(&config).await;
    assert_eq!(first.completed, 2);

    let second = run_harvest(&config).await;
    assert!(second.is_noop());
    assert_eq!(csv_ids(&csv_path(&dir)).len(), 2);
}
