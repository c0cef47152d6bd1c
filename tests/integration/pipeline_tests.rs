//! Extraction, cleaning and de-duplication against a live server

use crate::common::{http_engine, test_config};
use serde_json::json;
use std::collections::BTreeMap;
use sumi_harvest::pipeline::StageSpec;
use sumi_harvest::{JobOutcome, JobSpec, WorkItemState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn widget_job(base_url: &str) -> JobSpec {
    let mut spec = JobSpec::new(
        "widgets",
        vec![
            format!("{}/a", base_url),
            format!("{}/b", base_url),
            format!("{}/c", base_url),
        ],
    );
    spec.extraction_rules = BTreeMap::from([
        ("title".to_string(), "h1".to_string()),
        ("sku".to_string(), ".sku".to_string()),
    ]);
    spec.stages = vec![
        StageSpec::Extract,
        StageSpec::NormalizeWhitespace,
        StageSpec::RequireFields {
            fields: vec!["sku".to_string()],
        },
    ];
    spec.fingerprint_fields = vec!["sku".to_string()];
    spec.concurrency = 1;
    spec
}

#[tokio::test]
async fn test_duplicates_reach_the_sink_once() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/a", "<h1>Blue  Widget</h1><span class=\"sku\">W-1</span>").await;
    mount_page(&mock_server, "/b", "<h1>Blue Widget</h1><span class=\"sku\"> W-1 </span>").await;
    mount_page(&mock_server, "/c", "<h1>Red Widget</h1><span class=\"sku\">W-2</span>").await;

    let (engine, sink) = http_engine(test_config());
    let job = engine.submit(widget_job(&mock_server.uri())).unwrap();
    let progress = engine.wait(job).await.unwrap();

    assert_eq!(progress.outcome(), JobOutcome::Completed);
    assert_eq!(progress.done, 3);
    assert_eq!(progress.duplicates, 1);

    let items = sink.items_for(job);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].fields["title"], json!("Blue Widget"));
    assert_eq!(items[1].fields["sku"], json!("W-2"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rejected_items_retry_then_dead_letter() {
    let mock_server = MockServer::start().await;
    mount_page(&mock_server, "/a", "<h1>No SKU</h1>").await;
    mount_page(&mock_server, "/b", "<h1>Ok</h1><span class=\"sku\">W-3</span>").await;
    mount_page(&mock_server, "/c", "<h1>Ok</h1><span class=\"sku\">W-4</span>").await;

    let mut config = test_config();
    config.retry.content_error_retries = 1;
    let (engine, sink) = http_engine(config);
    let job = engine.submit(widget_job(&mock_server.uri())).unwrap();
    let progress = engine.wait(job).await.unwrap();

    assert_eq!(progress.outcome(), JobOutcome::CompletedWithErrors(1));
    assert_eq!(sink.items_for(job).len(), 2);

    let rejected = &engine.item_states(job).unwrap()[0];
    assert_eq!(rejected.state, WorkItemState::DeadLettered);
    assert_eq!(rejected.content_errors, 2);

    engine.shutdown().await;
}
