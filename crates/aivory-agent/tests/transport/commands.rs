//! Inbound command dispatch tests: breakpoint install/remove, malformed
//! command tolerance, and the end-to-end breakpoint-hit and sampling flows.

use super::*;
use pretty_assertions::assert_eq;

fn set_breakpoint_command(id: &str, class_name: &str, line_number: u32) -> Value {
    json!({
        "type": "set_breakpoint",
        "payload": {"id": id, "class_name": class_name, "line_number": line_number}
    })
}

#[test]
fn test_set_breakpoint_installs_probe() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        send_json(
            &mut ws,
            json!({
                "type": "set_breakpoint",
                "payload": {"id": "bp1", "class_name": "x.Y", "line_number": 42, "condition": "count > 3"}
            }),
        );
        std::thread::sleep(Duration::from_millis(500));
    });

    let registry = Arc::new(BreakpointRegistry::new());
    let controller = TransportController::new(test_config(port), registry.clone());
    controller.start();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.lookup("x.Y", 42).is_some()
    }));
    let record = registry.lookup("x.Y", 42).unwrap();
    assert_eq!(record.id, "bp1");
    // Conditions are stored but never evaluated
    assert_eq!(record.condition.as_deref(), Some("count > 3"));

    server.join().unwrap();
    controller.shutdown();
}

#[test]
fn test_remove_breakpoint_uninstalls_probe() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        send_json(&mut ws, set_breakpoint_command("bp1", "x.Y", 42));
        std::thread::sleep(Duration::from_millis(300));
        send_json(&mut ws, json!({"type": "remove_breakpoint", "payload": {"id": "bp1"}}));
        std::thread::sleep(Duration::from_millis(500));
    });

    let registry = Arc::new(BreakpointRegistry::new());
    let controller = TransportController::new(test_config(port), registry.clone());
    controller.start();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.lookup("x.Y", 42).is_some()
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        registry.lookup("x.Y", 42).is_none()
    }));
    assert_eq!(registry.count(), 0);

    server.join().unwrap();
    controller.shutdown();
}

#[test]
fn test_malformed_commands_are_dropped_not_fatal() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        // Garbage, missing fields, unknown kinds: all ignored
        ws.send(Message::text("][ not json")).unwrap();
        send_json(&mut ws, json!({"type": "set_breakpoint", "payload": {"id": "bp-broken"}}));
        send_json(&mut ws, json!({"type": "remove_breakpoint", "payload": {}}));
        send_json(&mut ws, json!({"type": "self_destruct", "payload": {"now": true}}));
        // A valid command afterwards still lands
        send_json(&mut ws, set_breakpoint_command("bp2", "x.Y", 50));
        std::thread::sleep(Duration::from_millis(500));
    });

    let registry = Arc::new(BreakpointRegistry::new());
    let controller = TransportController::new(test_config(port), registry.clone());
    controller.start();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.lookup("x.Y", 50).is_some()
    }));
    // The half-specified probe was never installed
    assert!(registry.get("bp-broken").is_none());
    assert_eq!(registry.count(), 1);
    assert!(controller.is_connected());

    server.join().unwrap();
    controller.shutdown();
}

#[test]
fn test_breakpoint_hit_roundtrip_and_removal() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        send_json(&mut ws, set_breakpoint_command("bp1", "x.Y", 42));
        let hit = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, json!({"type": "remove_breakpoint", "payload": {"id": "bp1"}}));
        // After removal, further hits at the location emit nothing
        let silence = read_frame(&mut ws, Duration::from_millis(700));
        (hit, silence)
    });

    let config = test_config(port);
    let registry = Arc::new(BreakpointRegistry::new());
    let controller = TransportController::new(config.clone(), registry.clone());
    controller.start();
    let interceptor = Interceptor::new(
        config.clone(),
        Arc::new(controller.clone()) as Arc<dyn CaptureSink>,
        registry.clone(),
    );
    assert!(wait_until(Duration::from_secs(5), || {
        registry.lookup("x.Y", 42).is_some()
    }));

    let receiver = RuntimeValue::object(
        "x.Y",
        vec![
            ("a".to_string(), RuntimeValue::Int(1)),
            ("b".to_string(), RuntimeValue::string("two")),
        ],
    );
    let stack = vec![FrameInfo::new("x.Y", "work", "Y.java", 42)];
    interceptor.on_breakpoint_hit("x.Y", 42, &stack, Some(&receiver), &[]);

    // Wait out the removal, then hit the now-empty location
    assert!(wait_until(Duration::from_secs(5), || {
        registry.lookup("x.Y", 42).is_none()
    }));
    interceptor.on_breakpoint_hit("x.Y", 42, &stack, Some(&receiver), &[]);

    let (hit, silence) = server.join().unwrap();
    let hit = hit.expect("breakpoint_hit frame");
    assert_eq!(hit["type"], "breakpoint_hit");
    let payload = &hit["payload"];
    assert_eq!(payload["breakpoint_id"], "bp1");
    assert_eq!(payload["agent_id"], config.agent_id.as_str());
    assert_eq!(payload["local_variables"]["this.a"]["value"], "1");
    assert_eq!(payload["local_variables"]["this.b"]["value"], "two");
    assert!(payload["captured_at"].as_str().unwrap().ends_with('Z'));
    assert!(silence.is_none(), "expected silence after removal, got {silence:?}");

    controller.shutdown();
}

#[test]
fn test_sampling_zero_suppresses_exceptions_but_not_heartbeats() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        drain_frames(&mut ws, Duration::from_millis(800))
    });

    let mut config = AgentConfig::new("test-key", format!("ws://127.0.0.1:{port}"));
    config.sampling_rate = 0.0;
    let config = Arc::new(config);
    let registry = Arc::new(BreakpointRegistry::new());
    let controller = TransportController::with_heartbeat_period(
        config.clone(),
        registry.clone(),
        Duration::from_millis(150),
    );
    controller.start();
    let interceptor = Interceptor::new(
        config,
        Arc::new(controller.clone()) as Arc<dyn CaptureSink>,
        registry,
    );
    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));

    let method = MethodDescriptor::new("com.acme.Worker", "run");
    let exceptions: Vec<_> = (0..1000)
        .map(|_| {
            ExceptionValue::new(
                "java.lang.RuntimeException",
                "boom",
                vec![FrameInfo::new("com.acme.Worker", "run", "Worker.java", 5)],
            )
        })
        .collect();
    for exception in &exceptions {
        interceptor.on_method_exit(None, &method, &[], Some(exception));
    }

    let frames = server.join().unwrap();
    assert!(
        frames.iter().all(|f| f["type"] != "exception"),
        "sampled-out exceptions leaked: {frames:?}"
    );
    assert!(
        frames.iter().any(|f| f["type"] == "heartbeat"),
        "expected heartbeats while authenticated"
    );

    controller.shutdown();
}
