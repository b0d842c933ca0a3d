//! Standard list aggregator against the fake portal

mod common;

use b24_client::api::{Error, ListOptions, Params};
use common::{FakeCrm, FakePortal};
use serde_json::json;

#[tokio::test]
async fn test_list_fetches_remaining_pages_in_one_batch() {
    let server = wiremock::MockServer::start().await;
    common::mount_portal(&server, FakePortal::new(FakeCrm::with_records(120))).await;
    let (client, _) = common::client(common::config().build());
    let mut credential = common::webhook(&server);

    let records = client
        .list(&mut credential, "crm.deal.list", Params::new(), &ListOptions::default())
        .await
        .unwrap();

    assert_eq!(common::ids(&records), (1..=120).collect::<Vec<_>>());

    let batches = common::batch_requests(&server).await;
    assert_eq!(batches.len(), 1);
    let commands = common::batch_commands(&batches[0]);
    let starts: Vec<_> = commands
        .iter()
        .map(|(_, method, params)| (method.as_str(), params.get("start").unwrap().to_string()))
        .collect();
    assert_eq!(starts, vec![("crm.deal.list", "50".to_string()), ("crm.deal.list", "100".to_string())]);
}

#[tokio::test]
async fn test_single_page_needs_no_batch() {
    let server = wiremock::MockServer::start().await;
    common::mount_portal(&server, FakePortal::new(FakeCrm::with_records(30))).await;
    let (client, _) = common::client(common::config().build());
    let mut credential = common::webhook(&server);

    let records = client
        .list(&mut credential, "crm.deal.list", Params::new(), &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 30);
    assert!(common::batch_requests(&server).await.is_empty());
}

#[tokio::test]
async fn test_limit_caps_pages_and_records() {
    let server = wiremock::MockServer::start().await;
    common::mount_portal(&server, FakePortal::new(FakeCrm::with_records(500))).await;
    let (client, _) = common::client(common::config().build());
    let mut credential = common::webhook(&server);

    let records = client
        .list(
            &mut credential,
            "crm.deal.list",
            Params::new(),
            &ListOptions::default().limit(120),
        )
        .await
        .unwrap();

    assert_eq!(common::ids(&records), (1..=120).collect::<Vec<_>>());
    let batches = common::batch_requests(&server).await;
    assert_eq!(common::batch_commands(&batches[0]).len(), 2);
}

#[tokio::test]
async fn test_length_mismatch_is_reported() {
    let server = wiremock::MockServer::start().await;
    common::mount_portal(&server, FakePortal::new(FakeCrm::with_records(120).total(150))).await;
    let (client, sink) = common::client(common::config().build());
    let mut credential = common::webhook(&server);

    let err = client
        .list(
            &mut credential,
            "crm.deal.list",
            Params::new(),
            &ListOptions::default().allowable_error(5),
        )
        .await
        .unwrap_err();

    match err {
        Error::ListLengthMismatch {
            total,
            fetched,
            difference,
            allowable,
        } => {
            assert_eq!((total, fetched, difference, allowable), (150, 120, 30, 5));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(sink.count("call_list_method_length_error"), 1);

    // Within tolerance the drift is accepted
    let records = client
        .list(
            &mut credential,
            "crm.deal.list",
            Params::new(),
            &ListOptions::default().allowable_error(30),
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 120);
}

#[tokio::test]
async fn test_id_list_shortcut() {
    let server = wiremock::MockServer::start().await;
    common::mount_portal(&server, FakePortal::new(FakeCrm::with_records(200))).await;
    let (client, _) = common::client(common::config().build());
    let mut credential = common::webhook(&server);

    let wanted: Vec<i64> = (1..=120).step_by(2).collect();
    let params = Params::from(json!({"filter": {"ID": wanted}, "select": ["ID"]}));

    let records = client
        .list(
            &mut credential,
            "crm.deal.list",
            params,
            &ListOptions::default().batch_size(25),
        )
        .await
        .unwrap();

    assert_eq!(common::ids(&records), wanted);
    let requests = common::requests(&server).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(common::batch_commands(&requests[0]).len(), 3);
}

#[tokio::test]
async fn test_list_rejects_bad_input() {
    let server = wiremock::MockServer::start().await;
    let (client, _) = common::client(common::config().build());
    let mut credential = common::webhook(&server);

    let err = client
        .list(&mut credential, "task.ctasks.getlist", Params::new(), &ListOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Usage(_)));

    let err = client
        .list(
            &mut credential,
            "crm.deal.list",
            Params::new(),
            &ListOptions::default().batch_size(0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Usage(_)));
    assert!(common::requests(&server).await.is_empty());
}
