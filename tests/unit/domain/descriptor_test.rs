use serde_json::json;
use tessera::domain::models::check::SignalPolarity;
use tessera::domain::models::descriptor::{ServiceDescriptor, SignalKind};
use tessera::domain::services::signal_evaluator::evaluate;
use tessera::engines::traits::ProbeResponse;

fn full_descriptor() -> ServiceDescriptor {
    serde_json::from_value(json!({
        "schema_version": "1.0",
        "service_key": "mailbox",
        "display_name": "Mailbox",
        "description": "Password recovery lookup",
        "requires_proxy": false,
        "recommended_delay": 1.5,
        "rate_limits": {"rpm": 20},
        "endpoints": [{
            "name": "recovery",
            "method": "post",
            "url": "https://mailbox.test/recover",
            "headers": {"X-Requested-With": "XMLHttpRequest"},
            "body": {"json": {"phone": "${phone_e164}", "flags": ["sms", "${phone_digits}"]}},
            "success_signals": [
                {"type": "status_range", "min": 200, "max": 299, "weight": 0.2},
                {"type": "json_path_equals", "path": "result.methods[0]", "value": "sms", "weight": 0.5},
                {"type": "header_equals", "name": "X-Account", "value": "1", "weight": 0.2},
                {"type": "body_matches", "pattern": "masked: \\+420 \\*+\\d{2}", "weight": 0.3}
            ],
            "failure_signals": [
                {"type": "body_contains", "text": "no such account"},
                {"type": "body_not_contains", "text": "result"}
            ],
            "retry": {"max_retries": 2, "backoff_ms": 250},
            "rate_limit_statuses": [503]
        }]
    }))
    .unwrap()
}

#[test]
fn test_full_descriptor_validates() {
    let descriptor = full_descriptor();
    descriptor.validate_descriptor().unwrap();

    assert_eq!(descriptor.name(), "Mailbox");
    // 60 / 20 rpm is stricter than the recommended delay
    assert_eq!(descriptor.effective_delay().as_secs_f64(), 3.0);

    let endpoint = &descriptor.endpoints[0];
    assert_eq!(endpoint.retry.max_retries, 2);
    assert_eq!(endpoint.failure_signals[0].weight, 0.5);
    assert!(matches!(
        endpoint.success_signals[3].kind,
        SignalKind::BodyMatches { .. }
    ));
}

#[test]
fn test_registered_response_scores_high() {
    let descriptor = full_descriptor();
    let endpoint = &descriptor.endpoints[0];
    let response = ProbeResponse::new(
        200,
        r#"{"result": {"methods": ["sms"], "hint": "masked: +420 ******67"}}"#,
    )
    .with_header("x-account", "1");

    let evaluation = evaluate(
        &endpoint.name,
        &response,
        &endpoint.success_signals,
        &endpoint.failure_signals,
    );

    assert_eq!(evaluation.confidence, 100.0);
    assert!(evaluation.has_success_match());
    assert_eq!(evaluation.matched.len(), 4);
    assert!(evaluation
        .matched
        .iter()
        .all(|m| m.polarity == SignalPolarity::Success && m.endpoint == "recovery"));
}

#[test]
fn test_unknown_account_response_scores_zero() {
    let descriptor = full_descriptor();
    let endpoint = &descriptor.endpoints[0];
    let response = ProbeResponse::new(200, "no such account");

    let evaluation = evaluate(
        &endpoint.name,
        &response,
        &endpoint.success_signals,
        &endpoint.failure_signals,
    );

    assert_eq!(evaluation.confidence, 0.0);
    let failures = evaluation
        .matched
        .iter()
        .filter(|m| m.polarity == SignalPolarity::Failure)
        .count();
    assert_eq!(failures, 2);
}
