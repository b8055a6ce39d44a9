//! Application, pool and resolver tests against a counting stub registry.

mod common;

use std::time::Duration;

use batata_upstream::{
    ClientPool, RegistryConfig, RouteConfig, UpstreamApp, UpstreamError, UpstreamSource,
};

use common::{Answer, StubFactory, instance, wait_until};

fn request() -> http::request::Parts {
    http::Request::new(()).into_parts().0
}

#[tokio::test]
async fn test_pool_defaults_to_empty_namespace() {
    let factory = StubFactory::new();
    let pool = ClientPool::connect(&RegistryConfig::default(), &factory)
        .await
        .unwrap();

    assert_eq!(pool.len(), 1);
    assert!(pool.client_for("").is_ok());
    assert!(pool.client_for("public").is_err());
}

#[tokio::test]
async fn test_pool_construction_is_all_or_nothing() {
    let factory = StubFactory::failing_on("dev");
    let config = RegistryConfig::default().with_namespaces(["prod", "dev"]);

    let err = ClientPool::connect(&config, &factory).await.err().unwrap();
    assert!(matches!(err, UpstreamError::ClientCreation { ref namespace, .. } if namespace == "dev"));
    assert!(err.is_config());

    // The client built before the failure was released.
    assert_eq!(
        factory
            .client("prod")
            .shutdowns
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_pool_rejects_malformed_address() {
    let factory = StubFactory::new();
    let config = RegistryConfig::new("", 8848);

    let err = ClientPool::connect(&config, &factory).await.err().unwrap();
    assert!(matches!(err, UpstreamError::InvalidConfig(_)));
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_end_to_end_push_scenario() {
    let factory = StubFactory::new();
    let config = RegistryConfig::default().with_namespaces(["", "prod"]);
    let app = UpstreamApp::start(config, &factory).await.unwrap();

    assert!(app.pool().client_for("prod").is_ok());
    let err = app.pool().client_for("staging").err().unwrap();
    assert_eq!(
        err.to_string(),
        "registry client for namespace 'staging' not found"
    );

    let client = factory.client("prod");
    client.answer(Answer::Instances(vec![
        instance("1.2.3.4", 8080, 10.0),
        instance("1.2.3.5", 8080, 0.0),
    ]));

    let resolver = app.resolver(RouteConfig::new("S").with_group("G").with_namespace("prod"));
    let upstreams = resolver.get_upstreams(&request()).await.unwrap();
    let dials: Vec<String> = upstreams.iter().map(|u| u.dial.clone()).collect();
    assert_eq!(dials, vec!["1.2.3.4:8080"]);

    assert!(wait_until(|| client.subscribes() == 1).await);
    assert!(client.push("S", "G", vec![instance("1.2.3.6", 8080, 3.0)]));

    let upstreams = resolver.get_upstreams(&request()).await.unwrap();
    let dials: Vec<String> = upstreams.iter().map(|u| u.dial.clone()).collect();
    assert_eq!(dials, vec!["1.2.3.6:8080"]);
    assert_eq!(client.queries(), 1);

    // The default namespace client was never touched.
    assert_eq!(factory.client("").queries(), 0);
}

#[tokio::test]
async fn test_resolver_zero_instances_is_typed_empty_result() {
    let factory = StubFactory::new();
    let app = UpstreamApp::start(RegistryConfig::default(), &factory)
        .await
        .unwrap();
    factory.client("").answer(Answer::Instances(Vec::new()));

    let resolver = app.resolver(RouteConfig::new("S"));
    let err = resolver.resolve().await.unwrap_err();
    assert!(err.is_empty_result());
    assert!(!err.is_unavailable());
}

#[tokio::test]
async fn test_resolver_unavailable_is_distinct_from_empty() {
    let factory = StubFactory::new();
    let app = UpstreamApp::start(RegistryConfig::default(), &factory)
        .await
        .unwrap();
    factory.client("").answer(Answer::Unavailable);

    let err = app.resolver(RouteConfig::new("S")).resolve().await.unwrap_err();
    assert!(err.is_unavailable());
    assert!(!err.is_empty_result());
}

#[tokio::test]
async fn test_resolver_serves_partial_result() {
    let factory = StubFactory::new();
    let app = UpstreamApp::start(RegistryConfig::default(), &factory)
        .await
        .unwrap();
    factory.client("").answer(Answer::Partial(
        vec![instance("10.0.0.1", 80, 1.0), instance("::1", 81, 1.0)],
        "2 invalid records".to_string(),
    ));

    let upstreams = app.resolver(RouteConfig::new("S")).resolve().await.unwrap();
    let dials: Vec<String> = upstreams.iter().map(ToString::to_string).collect();
    assert_eq!(dials, vec!["10.0.0.1:80", "[::1]:81"]);
}

#[tokio::test]
async fn test_select_instances() {
    let factory = StubFactory::new();
    let config = RegistryConfig::default().with_namespaces(["prod"]);
    let app = UpstreamApp::start(config, &factory).await.unwrap();
    factory.client("prod").answer(Answer::Instances(vec![
        instance("10.0.0.1", 80, 1.0).with_cluster("DEFAULT"),
        instance("10.0.0.2", 80, 1.0).with_cluster("BJ"),
    ]));

    let all = app.select_instances("S", "G", &[], "prod").await.unwrap();
    assert_eq!(all.len(), 2);

    let bj = app
        .select_instances("S", "G", &["BJ".to_string()], "prod")
        .await
        .unwrap();
    assert_eq!(bj.len(), 1);

    let err = app.select_instances("S", "G", &[], "").await.unwrap_err();
    assert!(matches!(err, UpstreamError::NamespaceNotFound(_)));
}

#[tokio::test]
async fn test_stop_cancels_listeners_and_closes_clients() {
    use std::sync::atomic::Ordering;

    let factory = StubFactory::new();
    let config = RegistryConfig::default().with_namespaces(["", "prod"]);
    let app = UpstreamApp::start(config, &factory).await.unwrap();
    let client = factory.client("prod");
    client.answer(Answer::Instances(vec![instance("10.0.0.1", 80, 1.0)]));

    app.resolver(RouteConfig::new("S").with_namespace("prod"))
        .resolve()
        .await
        .unwrap();
    assert!(wait_until(|| client.subscribes() == 1).await);

    app.stop_with_grace(Duration::from_secs(1)).await.unwrap();

    assert_eq!(client.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(client.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(factory.client("").shutdowns.load(Ordering::SeqCst), 1);
    assert!(app.pool().is_empty());

    // Cached keys still answer, new ones report the shutdown.
    let cached = app
        .resolver(RouteConfig::new("S").with_namespace("prod"))
        .resolve()
        .await
        .unwrap();
    assert_eq!(cached.len(), 1);

    let err = app
        .resolver(RouteConfig::new("T").with_namespace("prod"))
        .resolve()
        .await
        .unwrap_err();
    assert!(err.is_shutting_down());
    assert!(!err.is_config());
}
