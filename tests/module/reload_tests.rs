//! Reload orchestration tests
//!
//! Startup, fallback from one loader tier to the next, the reload gate and
//! the operator endpoints.

use futures::future::join_all;
use http::StatusCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::test_utils::*;
use tierload::config::ExhaustedPolicy;
use tierload::module::loader::{LoaderKind, LoaderMode};
use tierload::module::reload::{DegradeLevel, OrchestratorState, ReloadOutcome};
use tierload::server::route;

#[tokio::test]
async fn test_start_healthy() {
    let fixture = ModuleTestFixture::new().unwrap();
    fixture.add_module("b.jar", &["tierload.b.BInitializer"], None);
    let factory = ScriptedFactory::healthy();
    let orchestrator =
        fixture.orchestrator(fast_reload_config(ExhaustedPolicy::Halt), factory.clone());

    let state = orchestrator.start().await.unwrap();
    assert_eq!(state, OrchestratorState::Running);
    assert_eq!(orchestrator.mode(), LoaderMode::Untrusted);
    assert!(!orchestrator.reload_scheduled());
    assert_eq!(factory.attempts(), vec![LoaderKind::Untrusted]);

    let active = orchestrator.active_loader().unwrap();
    assert_eq!(active.kind(), LoaderKind::Untrusted);
    let hierarchy = orchestrator.hierarchy().unwrap();
    assert_eq!(hierarchy.trusted().modules().len(), 1);

    let response = orchestrator.handle(get("/anything")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response), "untrusted");
}

#[tokio::test]
async fn test_untrusted_failure_falls_back_to_trusted() {
    let fixture = ModuleTestFixture::new().unwrap();
    let factory = ScriptedFactory::failing_for(&[LoaderKind::Untrusted]);
    let orchestrator =
        fixture.orchestrator(fast_reload_config(ExhaustedPolicy::Halt), factory.clone());

    let state = orchestrator.start().await.unwrap();
    assert_eq!(state, OrchestratorState::Degraded(DegradeLevel::UntrustedFailed));
    assert_eq!(orchestrator.mode(), LoaderMode::Trusted);
    assert!(orchestrator.reload_scheduled());
    assert_eq!(
        orchestrator.handle(get("/x")).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    let o = orchestrator.clone();
    assert!(
        wait_until(
            move || o.state() == OrchestratorState::Running,
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(factory.attempts(), vec![LoaderKind::Untrusted, LoaderKind::Trusted]);
    assert_eq!(body_text(orchestrator.handle(get("/x")).await), "trusted");
}

#[tokio::test]
async fn test_trusted_failure_falls_back_to_platform() {
    let fixture = ModuleTestFixture::new().unwrap();
    let factory = ScriptedFactory::failing_for(&[LoaderKind::Untrusted, LoaderKind::Trusted]);
    let orchestrator =
        fixture.orchestrator(fast_reload_config(ExhaustedPolicy::Halt), factory.clone());

    orchestrator.start().await.unwrap();
    let o = orchestrator.clone();
    assert!(
        wait_until(
            move || o.state() == OrchestratorState::Running,
            Duration::from_secs(5)
        )
        .await
    );

    assert_eq!(orchestrator.mode(), LoaderMode::Custom);
    assert_eq!(
        factory.attempts(),
        vec![LoaderKind::Untrusted, LoaderKind::Trusted, LoaderKind::Platform]
    );
    assert_eq!(body_text(orchestrator.handle(get("/x")).await), "platform");
    assert!(!orchestrator.is_halted());
}

#[tokio::test]
async fn test_platform_failure_halts() {
    let fixture = ModuleTestFixture::new().unwrap();
    let factory = ScriptedFactory::failing_for(&[LoaderKind::Platform]);
    let mut config = fast_reload_config(ExhaustedPolicy::Halt);
    config.initial_mode = LoaderMode::Custom;
    let orchestrator = fixture.orchestrator(config, factory.clone());
    let halt = orchestrator.subscribe_halt();

    assert!(orchestrator.start().await.is_err());
    assert_eq!(orchestrator.state(), OrchestratorState::Failed);
    assert!(orchestrator.is_halted());
    assert!(*halt.borrow());
    // no further fallback
    assert!(!orchestrator.reload_scheduled());
    assert_eq!(factory.attempts(), vec![LoaderKind::Platform]);
}

#[tokio::test]
async fn test_exhausted_fallback_can_stay_degraded() {
    let fixture = ModuleTestFixture::new().unwrap();
    let factory = ScriptedFactory::failing_for(&[
        LoaderKind::Untrusted,
        LoaderKind::Trusted,
        LoaderKind::Platform,
    ]);
    let orchestrator = fixture.orchestrator(
        fast_reload_config(ExhaustedPolicy::StayDegraded),
        factory.clone(),
    );

    orchestrator.start().await.unwrap();
    let o = orchestrator.clone();
    assert!(
        wait_until(
            move || o.state() == OrchestratorState::Failed,
            Duration::from_secs(5)
        )
        .await
    );
    let o = orchestrator.clone();
    assert!(wait_until(move || !o.reload_scheduled(), Duration::from_secs(5)).await);

    assert_eq!(factory.attempts().len(), 3);
    assert!(!orchestrator.is_halted());
    assert_eq!(
        orchestrator.handle(get("/x")).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_requests_are_refused_while_reloading() {
    let fixture = ModuleTestFixture::new().unwrap();
    let factory = ScriptedFactory::healthy();
    let orchestrator =
        fixture.orchestrator(fast_reload_config(ExhaustedPolicy::Halt), factory.clone());
    orchestrator.start().await.unwrap();

    let reloading = {
        let o = orchestrator.clone();
        tokio::spawn(async move { o.reload(Duration::from_millis(300)).await })
    };
    let o = orchestrator.clone();
    assert!(wait_until(move || o.is_reloading(), Duration::from_secs(2)).await);

    let response = route(&orchestrator, get("/x")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(http::header::RETRY_AFTER));
    // admin endpoints are gated too
    assert_eq!(
        route(&orchestrator, get("/_modules")).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    // a concurrent reload is dropped
    assert_eq!(
        orchestrator.reload(Duration::ZERO).await.unwrap(),
        ReloadOutcome::Skipped
    );

    let outcome = reloading.await.unwrap().unwrap();
    assert_eq!(outcome, ReloadOutcome::Completed(OrchestratorState::Running));
    assert!(!orchestrator.is_reloading());
    assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(route(&orchestrator, get("/x")).await.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_concurrent_request_is_refused_while_reloading() {
    let fixture = ModuleTestFixture::new().unwrap();
    let orchestrator = fixture.orchestrator(
        fast_reload_config(ExhaustedPolicy::Halt),
        ScriptedFactory::healthy(),
    );
    orchestrator.start().await.unwrap();

    let reloading = {
        let o = orchestrator.clone();
        tokio::spawn(async move { o.reload(Duration::from_millis(500)).await })
    };
    let o = orchestrator.clone();
    assert!(wait_until(move || o.is_reloading(), Duration::from_secs(2)).await);

    let requests = (0..64).map(|i| {
        let o = orchestrator.clone();
        tokio::spawn(async move {
            let path = match i % 4 {
                0 => "/_modules".to_string(),
                _ => format!("/r/{}", i),
            };
            let via_route = route(&o, get(&path)).await.status();
            let via_handle = o.handle(get(&path)).await.status();
            (via_route, via_handle)
        })
    });
    let statuses = join_all(requests).await;
    assert!(orchestrator.is_reloading());
    assert_eq!(statuses.len(), 64);
    for status in statuses {
        let (via_route, via_handle) = status.unwrap();
        assert_eq!(via_route, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(via_handle, StatusCode::SERVICE_UNAVAILABLE);
    }

    reloading.await.unwrap().unwrap();
    assert!(!orchestrator.is_reloading());
    let first = route(&orchestrator, get("/x")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_text(first), "untrusted");
}

#[tokio::test]
async fn test_reload_picks_up_new_archives() {
    let fixture = ModuleTestFixture::new().unwrap();
    let orchestrator = fixture.orchestrator(
        fast_reload_config(ExhaustedPolicy::Halt),
        ScriptedFactory::healthy(),
    );
    orchestrator.start().await.unwrap();
    assert!(orchestrator.registry().snapshot().await.is_empty());

    fixture.add_module("late.jar", &["tierload.late.LateInitializer"], None);
    orchestrator.reload(Duration::ZERO).await.unwrap();

    let hierarchy = orchestrator.hierarchy().unwrap();
    assert_eq!(hierarchy.trusted().modules().len(), 1);
    let snapshot = orchestrator.registry().snapshot().await;
    assert!(snapshot[0].trusted);
}

#[tokio::test]
async fn test_admin_endpoints() {
    let fixture = ModuleTestFixture::new().unwrap();
    fixture.add_module("b.jar", &["tierload.b.BInitializer"], None);
    let orchestrator = fixture.orchestrator(
        fast_reload_config(ExhaustedPolicy::Halt),
        ScriptedFactory::healthy(),
    );
    orchestrator.start().await.unwrap();

    let status = route(&orchestrator, get("/_modules")).await;
    assert_eq!(status.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(status)).unwrap();
    assert_eq!(json["state"], "running");
    assert_eq!(json["mode"], "untrusted");
    assert_eq!(json["modules"][0]["coordinate"], "local:b:0");
    assert_eq!(json["modules"][0]["loader"], "trusted");
    assert!(json["generation"].as_str().unwrap().starts_with("gen_"));

    let bad = route(&orchestrator, post("/_modules/mode?value=root")).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    let missing = route(&orchestrator, post("/_modules/load?coordinate=app:none:1")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let accepted = route(&orchestrator, post("/_modules/mode?value=trusted")).await;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    assert_eq!(orchestrator.mode(), LoaderMode::Trusted);

    let o = orchestrator.clone();
    assert!(
        wait_until(
            move || !o.reload_scheduled() && !o.is_reloading(),
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(body_text(orchestrator.handle(get("/x")).await), "trusted");

    let disable = route(
        &orchestrator,
        post("/_modules/load?coordinate=local%3Ab%3A0&enabled=false"),
    )
    .await;
    assert_eq!(disable.status(), StatusCode::ACCEPTED);
    let o = orchestrator.clone();
    assert!(
        wait_until(
            move || !o.reload_scheduled() && !o.is_reloading(),
            Duration::from_secs(5)
        )
        .await
    );
    assert!(orchestrator.hierarchy().unwrap().trusted().modules().is_empty());

    assert_eq!(
        route(&orchestrator, get("/_modules/reload")).await.status(),
        StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn test_shutdown_cancels_scheduled_reloads() {
    let fixture = ModuleTestFixture::new().unwrap();
    let factory = ScriptedFactory::healthy();
    let orchestrator =
        fixture.orchestrator(fast_reload_config(ExhaustedPolicy::Halt), factory.clone());
    orchestrator.start().await.unwrap();

    orchestrator.schedule_reload(Duration::from_secs(60), Duration::ZERO);
    assert!(orchestrator.reload_scheduled());

    orchestrator.shutdown().await;
    assert!(!orchestrator.reload_scheduled());
    assert_eq!(orchestrator.state(), OrchestratorState::Idle);
    assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 1);
}
