use super::helpers::{numbers, orchestrator, orchestrator_config};
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use tessera::domain::models::check::CheckStatus;
use tessera::engines::proxy_pool::ProxyPool;
use tessera::infrastructure::descriptor_loader::DescriptorLoader;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_loaded_descriptors_drive_a_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/exists"))
        .respond_with(ResponseTemplate::new(200).set_body_string("account found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("seznamcz.yaml"),
        format!(
            r#"
service_key: seznamcz
display_name: Seznam.cz
recommended_delay: 0
endpoints:
  - name: exists
    url: "{}/api/exists?phone=${{phone_e164}}"
    success_signals:
      - type: body_contains
        text: account found
        weight: 1.0
"#,
            server.uri()
        ),
    )
    .unwrap();
    fs::write(
        dir.path().join("example.json"),
        json!({
            "service_key": "example",
            "recommended_delay": 0,
            "endpoints": [{
                "url": format!("{}/lookup/${{phone_digits}}", server.uri()),
                "success_signals": [{"type": "status_equals", "code": 200, "weight": 1.0}]
            }]
        })
        .to_string(),
    )
    .unwrap();

    let catalog = DescriptorLoader::new(vec![dir.path().to_path_buf()])
        .load()
        .unwrap();
    assert_eq!(catalog.len(), 2);

    let descriptors = catalog.select(&numbers(&["Seznam", "EXAMPLE"]));
    assert_eq!(descriptors.len(), 2);

    let (results, summary) = orchestrator(orchestrator_config(2), ProxyPool::empty())
        .run_collect(&numbers(&["+420 731 234 567"]), &descriptors)
        .await;

    assert_eq!(summary.total, 2);
    let status_of = |key: &str| {
        results
            .iter()
            .find(|r| r.service_key == key)
            .map(|r| r.status)
    };
    assert_eq!(status_of("seznamcz"), Some(CheckStatus::Found));
    assert_eq!(status_of("example"), Some(CheckStatus::NotFound));
}
