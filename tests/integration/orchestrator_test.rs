use super::helpers::{descriptor, numbers, orchestrator, orchestrator_config};
use serde_json::json;
use std::time::{Duration, Instant};
use tessera::domain::models::check::{CheckStatus, ErrorReason};
use tessera::engines::proxy_pool::{ProxyPool, ProxyPoolConfig};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_found_and_not_found_with_duplicate_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/check"))
        .and(query_param("phone", "420731234567"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exists": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exists": false})))
        .with_priority(10)
        .expect(1)
        .mount(&server)
        .await;

    let descriptors = vec![descriptor("mock", &server.uri(), json!({}))];
    let candidates = numbers(&["+420 731 234 567", "+420 731 234 568", "+420 731 234 567"]);

    let (results, summary) = orchestrator(orchestrator_config(2), ProxyPool::empty())
        .run_collect(&candidates, &descriptors)
        .await;

    assert_eq!(summary.total, 2);
    assert_eq!(results.len(), 2);
    assert_eq!(summary.found, 1);
    assert_eq!(summary.not_found, 1);
    assert!(summary.finished_at.is_some());

    let found = results
        .iter()
        .find(|r| r.status == CheckStatus::Found)
        .unwrap();
    assert_eq!(found.candidate_number, "+420 731 234 567");
    assert_eq!(found.confidence, 100.0);
    assert_eq!(found.matched_signals.len(), 1);
    assert!(found
        .evidence_url
        .as_deref()
        .unwrap()
        .contains("phone=420731234567"));
}

#[tokio::test]
async fn test_proxy_required_without_proxies_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let descriptors = vec![descriptor(
        "proxied",
        &server.uri(),
        json!({"requires_proxy": true}),
    )];

    let (results, summary) = orchestrator(orchestrator_config(1), ProxyPool::empty())
        .run_collect(&numbers(&["+420 731 234 567"]), &descriptors)
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, CheckStatus::Error);
    assert_eq!(results[0].error_reason, Some(ErrorReason::ProxyUnavailable));
    assert_eq!(summary.error, 1);
}

#[tokio::test]
async fn test_rate_limited_response_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(1)
        .mount(&server)
        .await;

    let descriptors = vec![descriptor(
        "limited",
        &server.uri(),
        json!({"endpoints": [{
            "url": format!("{}/check?phone=${{phone}}", server.uri()),
            "retry": {"max_retries": 3, "backoff_ms": 10},
            "success_signals": [{"type": "status_equals", "code": 200, "weight": 1.0}]
        }]}),
    )];

    let (results, summary) = orchestrator(orchestrator_config(1), ProxyPool::empty())
        .run_collect(&numbers(&["+420 731 234 567"]), &descriptors)
        .await;

    assert_eq!(results[0].status, CheckStatus::RateLimited);
    assert_eq!(summary.rate_limited, 1);
}

#[tokio::test]
async fn test_block_page_is_reported_as_blocked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><title>Just a moment...</title><div id=\"cf-chl\"></div></html>"),
        )
        .mount(&server)
        .await;

    let descriptors = vec![descriptor(
        "guarded",
        &server.uri(),
        json!({"endpoints": [{
            "url": format!("{}/check", server.uri()),
            "query": {"phone": "${phone_e164}"},
            "block_markers": ["Just a moment"],
            "success_signals": [{"type": "status_equals", "code": 200, "weight": 1.0}]
        }]}),
    )];

    let (results, _) = orchestrator(orchestrator_config(1), ProxyPool::empty())
        .run_collect(&numbers(&["+420 731 234 567"]), &descriptors)
        .await;

    assert_eq!(results[0].status, CheckStatus::Blocked);
    assert_eq!(results[0].confidence, 0.0);
}

#[tokio::test]
async fn test_timeouts_are_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .expect(2)
        .mount(&server)
        .await;

    let descriptors = vec![descriptor(
        "sluggish",
        &server.uri(),
        json!({
            "request_timeout": 1,
            "endpoints": [{
                "url": format!("{}/check?phone=${{phone_urlencoded}}", server.uri()),
                "retry": {"max_retries": 1, "backoff_ms": 10},
                "success_signals": [{"type": "status_equals", "code": 200, "weight": 1.0}]
            }]
        }),
    )];

    let (results, summary) = orchestrator(orchestrator_config(1), ProxyPool::empty())
        .run_collect(&numbers(&["+420 731 234 567"]), &descriptors)
        .await;

    assert_eq!(results[0].status, CheckStatus::Timeout);
    assert_eq!(results[0].attempts, 2);
    assert_eq!(summary.timeout, 1);
}

#[tokio::test]
async fn test_signed_form_body_reaches_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/lookup/"))
        .and(header("content-type", "application/x-www-form-urlencoded; charset=UTF-8"))
        .and(body_string_contains("ig_sig_key_version=4&signed_body="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "user": {"pk": 1}})))
        .expect(1)
        .mount(&server)
        .await;

    let descriptors = vec![descriptor(
        "signed",
        &server.uri(),
        json!({"endpoints": [{
            "method": "POST",
            "url": format!("{}/users/lookup/", server.uri()),
            "body": {"form": {"q": "${phone}", "directly_sign_in": "true"}},
            "signer": {
                "type": "hmac_sha256_signed_body",
                "key": "test-signing-key",
                "phone_format": "digits"
            },
            "success_signals": [
                {"type": "json_path_equals", "path": "user.pk", "value": 1, "weight": 1.0}
            ]
        }]}),
    )];

    let (results, _) = orchestrator(orchestrator_config(1), ProxyPool::empty())
        .run_collect(&numbers(&["+420 731 234 567"]), &descriptors)
        .await;

    assert_eq!(results[0].status, CheckStatus::Found);
}

#[tokio::test]
async fn test_same_service_requests_are_spaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exists": false})))
        .expect(3)
        .mount(&server)
        .await;

    let descriptors = vec![descriptor(
        "polite",
        &server.uri(),
        json!({"recommended_delay": 0.4}),
    )];
    let candidates = numbers(&["+420 731 234 561", "+420 731 234 562", "+420 731 234 563"]);

    let started = Instant::now();
    let (results, _) = orchestrator(orchestrator_config(3), ProxyPool::empty())
        .run_collect(&candidates, &descriptors)
        .await;

    assert_eq!(results.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(750));
}

#[tokio::test]
async fn test_cancel_stops_pending_work() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"exists": false}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let descriptors = vec![descriptor("slow", &server.uri(), json!({}))];
    let candidates: Vec<String> = (0..20).map(|i| format!("+420 731 234 5{:02}", i)).collect();

    let orchestrator = orchestrator(orchestrator_config(1), ProxyPool::empty());
    let (handle, mut receiver) = orchestrator.start(&candidates, &descriptors).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();

    let mut delivered = 0;
    while receiver.recv().await.is_some() {
        delivered += 1;
    }
    let summary = handle.join().await;

    assert_eq!(summary.total, 20);
    assert!(summary.cancelled >= 18);
    assert_eq!(summary.completed() + summary.cancelled, summary.total);
    assert_eq!(delivered + summary.undelivered, summary.completed());
}

#[tokio::test]
async fn test_dropped_receiver_counts_undelivered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exists": true})))
        .mount(&server)
        .await;

    let descriptors = vec![descriptor("mock", &server.uri(), json!({}))];
    let orchestrator = orchestrator(orchestrator_config(2), ProxyPool::empty());
    let (handle, receiver) = orchestrator
        .start(&numbers(&["+420 731 234 567", "+420 731 234 568"]), &descriptors)
        .await;
    drop(receiver);

    let summary = handle.join().await;
    assert_eq!(summary.found, 2);
    assert_eq!(summary.undelivered, 2);
}

#[tokio::test]
async fn test_failing_proxy_is_marked_dead() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // Nothing listens on port 9 locally, every proxied request is refused.
    let pool = ProxyPool::new(
        vec!["http://127.0.0.1:9"],
        ProxyPoolConfig {
            dead_after_failures: 2,
            revive_after: None,
        },
    );
    let descriptors = vec![descriptor("proxied", &server.uri(), json!({"requires_proxy": true}))];
    let candidates = numbers(&["+420 731 234 561", "+420 731 234 562", "+420 731 234 563"]);

    let orchestrator = orchestrator(orchestrator_config(1), pool);
    let (results, _) = orchestrator.run_collect(&candidates, &descriptors).await;

    let reasons: Vec<Option<ErrorReason>> = results.iter().map(|r| r.error_reason).collect();
    assert_eq!(
        reasons,
        vec![
            Some(ErrorReason::Network),
            Some(ErrorReason::Network),
            Some(ErrorReason::ProxyUnavailable)
        ]
    );
}

#[tokio::test]
async fn test_optional_proxy_goes_direct_once_degraded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exists": true})))
        .expect(1)
        .mount(&server)
        .await;

    let pool = ProxyPool::new(vec!["http://127.0.0.1:9"], ProxyPoolConfig::default());
    let descriptors = vec![descriptor("direct", &server.uri(), json!({}))];
    let candidates = numbers(&["+420 731 234 561", "+420 731 234 562"]);

    let (results, _) = orchestrator(orchestrator_config(1), pool)
        .run_collect(&candidates, &descriptors)
        .await;

    // The first check burns the proxy, the second skips it
    assert_eq!(results[0].error_reason, Some(ErrorReason::Network));
    assert_eq!(results[1].status, CheckStatus::Found);
}
