//! End-to-end tests for sending, retrying, chaining and captcha recovery.

#[cfg(test)]
mod tests {
    use crate::captcha::{CaptchaChallenge, CaptchaCoordinator};
    use crate::config::SendMode;
    use crate::errors::{ApiError, RequestError, TransportError};
    use crate::pipeline::forced_str;
    use crate::request::{Media, Params, PartType, Request};
    use crate::session::Session;
    use crate::testing::{
        assert_api_error, assert_cancelled, assert_exhausted, assert_succeeded, outcome_json,
        test_config, test_session, test_session_with, MockReply, MockTransport,
    };
    use crate::token::MockTokenProvider;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn setup() -> (Arc<MockTransport>, Session) {
        let transport = Arc::new(MockTransport::new());
        let session = test_session(transport.clone());
        (transport, session)
    }

    fn connection_error() -> MockReply {
        MockReply::Fail(TransportError::Connection("reset".into()))
    }

    #[derive(Default)]
    struct Deliveries {
        successes: AtomicUsize,
        errors: Mutex<Vec<RequestError>>,
    }

    impl Deliveries {
        fn attach(self: &Arc<Self>, request: &Request) {
            let on_success = self.clone();
            let on_error = self.clone();
            request
                .on_success(move |_| {
                    on_success.successes.fetch_add(1, Ordering::SeqCst);
                })
                .on_error(move |e| on_error.errors.lock().push(e.clone()));
        }

        fn successes(&self) -> usize {
            self.successes.load(Ordering::SeqCst)
        }

        fn errors(&self) -> Vec<RequestError> {
            self.errors.lock().clone()
        }
    }

    #[tokio::test]
    async fn test_budget_of_n_gives_one_terminal_error() {
        let (transport, session) = setup();
        transport.set_fallback(connection_error());

        let request = session.api("users.get", Params::new());
        request.set_max_attempts(4);
        let deliveries = Arc::new(Deliveries::default());
        deliveries.attach(&request);

        let outcome = request.send().await;

        assert_exhausted(&outcome, 4);
        assert_eq!(transport.call_count(), 4);
        assert_eq!(deliveries.errors().len(), 1);
        assert_eq!(deliveries.successes(), 0);

        let RequestError::AttemptsExhausted { last_error, .. } = &deliveries.errors()[0] else {
            panic!("expected exhaustion");
        };
        assert!(last_error.as_deref().is_some_and(RequestError::is_retryable));
    }

    #[tokio::test]
    async fn test_unlimited_budget_retries_until_success() {
        let (transport, session) = setup();
        for _ in 0..20 {
            transport.push(connection_error());
        }
        transport.push(MockReply::response(json!({"ok": true})));

        let request = session.api("users.get", Params::new());
        request.set_max_attempts(0);
        let outcome = request.send().await;

        assert_eq!(outcome_json(&outcome), json!({"ok": true}));
        assert_eq!(transport.call_count(), 21);
        assert_eq!(request.attempts(), 21);
    }

    #[tokio::test]
    async fn test_unlimited_budget_stops_on_cancel() {
        let (transport, session) = setup();
        transport.set_fallback(connection_error());

        let request = session.api("users.get", Params::new());
        request.set_max_attempts(0);
        let handle = request.spawn();

        transport.wait_for_calls(5).await;
        request.cancel();
        let outcome = handle.await.unwrap();

        assert_cancelled(&outcome);
        let calls = transport.call_count();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.call_count(), calls);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_delivers_cancellation_once() {
        let (transport, session) = setup();
        transport.push(MockReply::Hang);

        let request = session.api("users.get", Params::new());
        let deliveries = Arc::new(Deliveries::default());
        deliveries.attach(&request);

        let handle = request.spawn();
        transport.wait_for_calls(1).await;
        request.cancel();

        assert_cancelled(&handle.await.unwrap());
        assert_eq!(deliveries.errors().len(), 1);
        assert!(deliveries.errors()[0].is_cancelled());
        assert_eq!(deliveries.successes(), 0);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_late_success_after_cancel_is_discarded() {
        let (transport, session) = setup();
        let gate = Arc::new(Notify::new());
        transport.push(MockReply::gated(
            gate.clone(),
            MockReply::response(json!({"late": true})),
        ));

        let request = session.api("users.get", Params::new());
        request.set_send_mode(SendMode::Synchronous);
        let deliveries = Arc::new(Deliveries::default());
        deliveries.attach(&request);

        let handle = request.spawn();
        transport.wait_for_calls(1).await;
        request.cancel();
        gate.notify_one();

        assert_cancelled(&handle.await.unwrap());
        assert_eq!(deliveries.successes(), 0);
    }

    #[tokio::test]
    async fn test_chain_stops_at_failing_step() {
        let (transport, session) = setup();
        transport.route("/step.one", MockReply::response(json!({"next": "step.two"})));
        transport.route(
            "/step.two",
            MockReply::api_error(ApiError::new(100, "One of the parameters is invalid")),
        );

        let third_built = Arc::new(AtomicBool::new(false));
        let built = third_built.clone();
        let (s2, s3) = (session.clone(), session.clone());
        let chain = session
            .api("step.one", Params::new())
            .chain(move |value| Ok(s2.api(forced_str(&value, "next")?, Params::new())))
            .chain(move |_| {
                built.store(true, Ordering::SeqCst);
                Ok(s3.api("step.three", Params::new()))
            });

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        chain.on_error(move |e| sink.lock().push(e.clone()));

        let outcome = chain.send().await;

        assert_api_error(&outcome, 100);
        assert!(!third_built.load(Ordering::SeqCst));
        assert_eq!(transport.call_count(), 2);
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(errors.lock()[0].api().map(|e| e.code), Some(100));
    }

    #[tokio::test]
    async fn test_two_step_upload_issues_two_calls_and_one_success() {
        let (transport, session) = setup();
        transport.route(
            "/photos.getMessagesUploadServer",
            MockReply::response(json!({"upload_url": "http://upload/server"})),
        );
        transport.route("http://upload/server", MockReply::json(json!({"photo": "p"})));

        let uploader = session.clone();
        let chain = session
            .api("photos.getMessagesUploadServer", Params::new())
            .chain(move |value| {
                Ok(uploader.upload(
                    forced_str(&value, "upload_url")?,
                    vec![Media::jpg(vec![1, 2, 3])],
                    PartType::Photo,
                ))
            });

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        chain.on_success(move |payload| sink.lock().push(payload.to_vec()));

        chain.send().await.unwrap();

        assert_eq!(
            transport.urls(),
            vec![
                "http://test/method/photos.getMessagesUploadServer",
                "http://upload/server"
            ]
        );
        assert_eq!(*results.lock(), vec![br#"{"photo":"p"}"#.to_vec()]);
    }

    fn budgeted(session: &Session, method: &str, max_attempts: u32) -> Request {
        let request = session.api(method, Params::new());
        request.set_max_attempts(max_attempts);
        request
    }

    #[tokio::test]
    async fn test_each_chain_step_gets_a_fresh_budget() {
        let (transport, session) = setup();
        for _ in 0..2 {
            transport.route("/step.one", connection_error());
            transport.route("/step.two", connection_error());
        }
        transport.route("/step.one", MockReply::response(json!({})));
        transport.route("/step.two", MockReply::response(json!("done")));

        let next = session.clone();
        let chain = budgeted(&session, "step.one", 3)
            .chain(move |_| Ok(budgeted(&next, "step.two", 3)));

        assert_eq!(outcome_json(&chain.send().await), json!("done"));
        assert_eq!(transport.call_count(), 6);
        assert_eq!(chain.live().attempts(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_chain_step_reports_its_own_attempts() {
        let (transport, session) = setup();
        transport.route("/step.one", connection_error());
        transport.route("/step.one", MockReply::response(json!({})));
        transport.route("/step.two", connection_error());
        transport.set_fallback(connection_error());

        let next = session.clone();
        let chain = budgeted(&session, "step.one", 2)
            .chain(move |_| Ok(budgeted(&next, "step.two", 4)));
        let deliveries = Arc::new(Deliveries::default());
        deliveries.attach(chain.head());

        let outcome = chain.send().await;

        assert_exhausted(&outcome, 4);
        assert_eq!(transport.call_count(), 6);
        assert_eq!(deliveries.errors().len(), 1);
        assert_eq!(deliveries.successes(), 0);
    }

    #[tokio::test]
    async fn test_head_sent_alone_after_chain_delivers_to_its_callbacks() {
        let (transport, session) = setup();
        transport.set_fallback(MockReply::response(json!({})));

        let head = session.api("first", Params::new());
        let next = session.clone();
        let chain = head
            .clone()
            .chain(move |_| Ok(next.api("second", Params::new())));
        chain.send().await.unwrap();
        assert_ne!(head.live().id(), head.id());

        let deliveries = Arc::new(Deliveries::default());
        deliveries.attach(&head);
        head.send().await.unwrap();

        assert_eq!(
            transport.urls(),
            vec![
                "http://test/method/first",
                "http://test/method/second",
                "http://test/method/first"
            ]
        );
        assert_eq!(head.live().id(), head.id());
        assert_eq!(deliveries.successes(), 1);
        assert_eq!(head.attempts(), 1);
        assert!(head.payload().is_some());
    }

    #[tokio::test]
    async fn test_callbacks_set_after_swap_reach_live_step() {
        let (transport, session) = setup();
        let gate = Arc::new(Notify::new());
        transport.route("/first", MockReply::response(json!({})));
        transport.route(
            "/second",
            MockReply::gated(gate.clone(), MockReply::response(json!({"step": 2}))),
        );

        let head = session.api("first", Params::new());
        let first_fired = Arc::new(AtomicBool::new(false));
        let fired = first_fired.clone();
        head.on_success(move |_| fired.store(true, Ordering::SeqCst));

        let next = session.clone();
        let chain = head
            .clone()
            .chain(move |_| Ok(next.api("second", Params::new())));
        let handle = chain.spawn();

        transport.wait_for_calls(2).await;
        assert_ne!(head.live().id(), head.id());

        let replaced = Arc::new(AtomicUsize::new(0));
        let count = replaced.clone();
        head.on_success(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        gate.notify_one();

        assert_succeeded(&handle.await.unwrap());
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
        assert!(!first_fired.load(Ordering::SeqCst));
        assert!(head.live().payload().is_some());
    }

    #[tokio::test]
    async fn test_cancelling_chain_stops_later_builders() {
        let (transport, session) = setup();
        transport.route("/first", MockReply::response(json!({})));
        transport.route("/second", MockReply::Hang);

        let third_built = Arc::new(AtomicBool::new(false));
        let built = third_built.clone();
        let (s2, s3) = (session.clone(), session.clone());
        let chain = session
            .api("first", Params::new())
            .chain(move |_| Ok(s2.api("second", Params::new())))
            .chain(move |_| {
                built.store(true, Ordering::SeqCst);
                Ok(s3.api("third", Params::new()))
            });

        let handle = chain.spawn();
        transport.wait_for_calls(2).await;
        chain.cancel();

        assert_cancelled(&handle.await.unwrap());
        assert!(chain.is_cancelled());
        assert!(!third_built.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_captcha_answer_goes_only_to_owner() {
        let (transport, session) = setup();
        transport.route("/owner.call", MockReply::api_error(ApiError::captcha("sid-1", "http://img")));
        transport.route("/owner.call", MockReply::response(json!("owner done")));
        transport.route("/other.call", MockReply::response(json!("other done")));

        let challenged = Arc::new(Notify::new());
        let seen: Arc<Mutex<Vec<(u64, CaptchaChallenge)>>> = Arc::default();
        {
            let challenged = challenged.clone();
            let seen = seen.clone();
            session.captcha().on_challenge(move |owner, challenge| {
                seen.lock().push((owner, challenge.clone()));
                challenged.notify_one();
            });
        }

        let owner = session.api("owner.call", Params::new());
        owner.set_timeout(Duration::from_secs(5));
        let handle = owner.spawn();
        challenged.notified().await;

        let other = session.api("other.call", Params::new());
        assert_succeeded(&other.send().await);

        session.captcha().resolve("sid-1", "answer").unwrap();
        assert_succeeded(&handle.await.unwrap());

        let calls = transport.calls();
        let other_call = calls.iter().find(|c| c.url.ends_with("/other.call")).unwrap();
        assert!(!other_call.parameters.contains_key("captcha_sid"));

        let owner_calls: Vec<_> = calls.iter().filter(|c| c.url.ends_with("/owner.call")).collect();
        assert_eq!(owner_calls.len(), 2);
        assert!(!owner_calls[0].parameters.contains_key("captcha_key"));
        assert_eq!(owner_calls[1].parameters["captcha_sid"], "sid-1");
        assert_eq!(owner_calls[1].parameters["captcha_key"], "answer");

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].0, owner.id());
        assert_eq!(seen.lock()[0].1.image_url.as_deref(), Some("http://img"));
        assert!(session.captcha().is_idle());
    }

    #[tokio::test]
    async fn test_second_captcha_is_a_conflict() {
        let (transport, session) = setup();
        transport.route("/first.call", MockReply::api_error(ApiError::captcha("sid-a", "img")));
        transport.route("/first.call", MockReply::response(json!(1)));
        transport.route("/second.call", MockReply::api_error(ApiError::captcha("sid-b", "img")));

        let challenged = Arc::new(Notify::new());
        {
            let challenged = challenged.clone();
            session
                .captcha()
                .on_challenge(move |_, _| challenged.notify_one());
        }

        let first = session.api("first.call", Params::new());
        first.set_timeout(Duration::from_secs(5));
        let handle = first.spawn();
        challenged.notified().await;

        let second = session.api("second.call", Params::new());
        let outcome = second.send().await;
        assert!(matches!(
            outcome,
            Err(RequestError::CaptchaConflict { request_id, pending_owner })
                if request_id == second.id() && pending_owner == first.id()
        ));

        session.captcha().resolve("sid-a", "key").unwrap();
        assert_succeeded(&handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_sessions_sharing_a_coordinator_conflict() {
        let transport = Arc::new(MockTransport::new());
        transport.route("/first.call", MockReply::api_error(ApiError::captcha("sid-a", "img")));
        transport.route("/first.call", MockReply::response(json!(1)));
        transport.route("/second.call", MockReply::api_error(ApiError::captcha("sid-b", "img")));

        let captcha = Arc::new(CaptchaCoordinator::new());
        let build = || {
            Session::builder(transport.clone())
                .with_config(test_config())
                .with_captcha(captcha.clone())
                .build()
        };
        let (a, b) = (build(), build());

        let challenged = Arc::new(Notify::new());
        {
            let challenged = challenged.clone();
            captcha.on_challenge(move |_, _| challenged.notify_one());
        }

        let first = a.api("first.call", Params::new());
        first.set_timeout(Duration::from_secs(5));
        let handle = first.spawn();
        challenged.notified().await;

        let second = b.api("second.call", Params::new());
        assert_ne!(first.id(), second.id());
        let outcome = second.send().await;
        assert!(matches!(
            outcome,
            Err(RequestError::CaptchaConflict { request_id, pending_owner })
                if request_id == second.id() && pending_owner == first.id()
        ));

        captcha.resolve("sid-a", "key-a").unwrap();
        assert_succeeded(&handle.await.unwrap());

        let first_calls: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c.url.ends_with("/first.call"))
            .collect();
        assert_eq!(first_calls[1].parameters["captcha_sid"], "sid-a");
        assert_eq!(first_calls[1].parameters["captcha_key"], "key-a");
        assert!(captcha.is_idle());
    }

    #[tokio::test]
    async fn test_unanswered_captcha_fails_when_budget_runs_out() {
        let (transport, session) = setup();
        transport.set_fallback(MockReply::api_error(ApiError::captcha("sid-x", "img")));

        let request = session.api("users.get", Params::new());
        request.set_max_attempts(2);
        request.set_timeout(Duration::from_millis(30));
        let outcome = request.send().await;

        assert!(matches!(
            outcome,
            Err(RequestError::CaptchaUnresolved { ref sid, .. }) if sid == "sid-x"
        ));
        assert_eq!(transport.call_count(), 2);
        assert!(session.captcha().is_idle());
    }

    #[tokio::test]
    async fn test_language_is_kept_only_when_supported() {
        let (transport, session) = setup();
        transport.set_fallback(MockReply::response(json!(1)));

        let request = session.api("users.get", Params::new());
        assert!(request.set_language(Some("en")));
        assert!(!request.set_language(Some("tlh")));
        assert_eq!(request.language().as_deref(), Some("en"));

        request.send().await.unwrap();
        assert_eq!(transport.calls()[0].parameters["lang"], "en");

        assert!(request.set_language(None));
        request.send().await.unwrap();
        assert!(!transport.calls()[1].parameters.contains_key("lang"));
    }

    #[tokio::test]
    async fn test_session_language_applies_without_override() {
        let transport = Arc::new(MockTransport::new());
        let session = test_session_with(transport.clone(), test_config().with_language("de"));
        transport.push(MockReply::response(json!(1)));

        let request = session.api("users.get", Params::new());
        request.send().await.unwrap();

        assert_eq!(request.language().as_deref(), Some("de"));
        assert_eq!(transport.calls()[0].parameters["lang"], "de");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_synchronous_mode_retries_on_caller_task() {
        let (transport, session) = setup();
        transport.push(MockReply::Fail(TransportError::Status(502)));
        transport.push(MockReply::api_error(ApiError::new(6, "Too many requests per second")));
        transport.push(MockReply::response(json!({"done": 1})));

        let request = session.api("users.get", Params::new());
        request.set_send_mode(SendMode::Synchronous);
        let outcome = request.send().await;

        assert_eq!(outcome_json(&outcome), json!({"done": 1}));
        assert_eq!(transport.call_count(), 3);
        assert!(request
            .log()
            .iter()
            .any(|entry| entry.message == "Prepare to send synchronously 3 of 3 times"));
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_token_once() {
        let transport = Arc::new(MockTransport::new());
        let mut token = MockTokenProvider::new();
        token
            .expect_current_token()
            .returning(|| Some("fresh".to_string()));
        token.expect_refresh().times(1).returning(|| true);

        let session = Session::builder(transport.clone())
            .with_config(test_config())
            .with_token(Arc::new(token))
            .build();
        transport.push(MockReply::api_error(ApiError::new(5, "User authorization failed")));
        transport.push(MockReply::api_error(ApiError::new(5, "User authorization failed")));

        let request = session.api("users.get", Params::new());
        let outcome = request.send().await;

        assert_api_error(&outcome, 5);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.calls()[1].parameters["access_token"], "fresh");
    }

    #[tokio::test]
    async fn test_resend_delivers_again() {
        let (transport, session) = setup();
        transport.set_fallback(MockReply::response(json!(1)));

        let request = session.api("users.get", Params::new());
        let deliveries = Arc::new(Deliveries::default());
        deliveries.attach(&request);

        request.send().await.unwrap();
        request.send().await.unwrap();

        assert_eq!(deliveries.successes(), 2);
        assert!(deliveries.errors().is_empty());
    }

    #[tokio::test]
    async fn test_independent_requests_run_concurrently() {
        let (transport, session) = setup();
        let gate = Arc::new(Notify::new());
        transport.route("/slow", MockReply::gated(gate.clone(), MockReply::response(json!(1))));
        transport.route("/fast", MockReply::response(json!(2)));

        let slow = session.api("slow", Params::new()).spawn();
        transport.wait_for_calls(1).await;

        let fast = session.api("fast", Params::new()).send().await;
        assert_succeeded(&fast);

        gate.notify_one();
        assert_succeeded(&slow.await.unwrap());
    }
}
