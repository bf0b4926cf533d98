//! Session lifecycle tests: registration, heartbeat, pre-auth queueing,
//! remote close with backoff reconnect, auth rejection, shutdown.

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_register_sent_on_connect_then_authenticated() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let register = read_frame(&mut ws, Duration::from_secs(5)).expect("register frame");
        send_json(&mut ws, registered_ack());
        // Hold the session open until the client has observed the ack
        std::thread::sleep(Duration::from_millis(300));
        register
    });

    let controller =
        TransportController::new(test_config(port), Arc::new(BreakpointRegistry::new()));
    controller.start();

    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));
    assert_eq!(controller.state(), ConnectionState::Authenticated);
    assert_eq!(controller.reconnect_attempts(), 0);

    let register = server.join().unwrap();
    assert_eq!(register["type"], "register");
    let payload = &register["payload"];
    assert_eq!(payload["api_key"], "test-key");
    assert_eq!(payload["hostname"], "test-host");
    assert_eq!(payload["runtime"], "rust");
    assert_eq!(payload["agent_version"], "1.0.0");
    assert_eq!(payload["environment"], "production");
    assert!(payload["agent_id"].as_str().unwrap().len() == 32);
    assert!(register["timestamp"].is_i64());

    controller.shutdown();
}

#[test]
fn test_heartbeat_flows_while_authenticated() {
    let (listener, port) = listener();
    let config = test_config(port);
    let agent_id = config.agent_id.clone();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        // Collect a few heartbeats
        let mut heartbeats = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while heartbeats.len() < 2 && Instant::now() < deadline {
            if let Some(frame) = read_frame(&mut ws, Duration::from_millis(500)) {
                if frame["type"] == "heartbeat" {
                    heartbeats.push(frame);
                }
            }
        }
        heartbeats
    });

    let controller = TransportController::with_heartbeat_period(
        config,
        Arc::new(BreakpointRegistry::new()),
        Duration::from_millis(150),
    );
    controller.start();
    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));

    let heartbeats = server.join().unwrap();
    assert!(heartbeats.len() >= 2, "expected heartbeats, got {heartbeats:?}");
    assert_eq!(heartbeats[0]["payload"]["agent_id"], agent_id.as_str());
    assert!(heartbeats[0]["payload"]["timestamp"].is_i64());

    controller.shutdown();
}

#[test]
fn test_exception_envelope_reaches_server() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        read_frame(&mut ws, Duration::from_secs(5))
    });

    let config = test_config(port);
    let controller = TransportController::new(config.clone(), Arc::new(BreakpointRegistry::new()));
    controller.start();
    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));

    controller.send_exception(sample_capture(&config));

    let frame = server.join().unwrap().expect("exception frame");
    assert_eq!(frame["type"], "exception");
    let payload = &frame["payload"];
    assert_eq!(payload["exception_type"], "java.lang.IllegalStateException");
    assert_eq!(payload["message"], "cart is closed");
    assert_eq!(payload["fingerprint"].as_str().unwrap().len(), 16);
    assert_eq!(payload["agent_id"], config.agent_id.as_str());
    assert_eq!(payload["environment"], "production");
    // Location fields come from the top stack frame
    assert_eq!(payload["class_name"], "com.acme.Cart");
    assert_eq!(payload["method_name"], "checkout");
    assert_eq!(payload["file_name"], "Cart.java");
    assert_eq!(payload["line_number"], 88);
    assert_eq!(payload["method_arguments"]["arg0"]["value"], "3");
    assert_eq!(payload["stack_trace"].as_array().unwrap().len(), 2);

    controller.shutdown();
}

#[test]
fn test_pre_auth_envelopes_are_queued_and_sent() {
    // The server never acknowledges registration before the capture arrives;
    // captures hit the queue unconditionally and may precede the ack.
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let register = read_frame(&mut ws, Duration::from_secs(5)).expect("register");
        let exception = read_frame(&mut ws, Duration::from_secs(5)).expect("pre-auth exception");
        send_json(&mut ws, registered_ack());
        std::thread::sleep(Duration::from_millis(200));
        (register, exception)
    });

    let config = test_config(port);
    let controller = TransportController::new(config.clone(), Arc::new(BreakpointRegistry::new()));
    controller.start();
    assert!(wait_until(Duration::from_secs(5), || controller.is_connected()));
    assert!(!controller.is_authenticated());

    controller.send_exception(sample_capture(&config));

    let (register, exception) = server.join().unwrap();
    assert_eq!(register["type"], "register");
    assert_eq!(exception["type"], "exception");

    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));
    controller.shutdown();
}

#[test]
fn test_remote_close_reconnects_with_backoff_and_reregisters() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        // First session: register, ack, then close from the server side
        let mut first = accept_ws(&listener);
        let register_one = read_frame(&mut first, Duration::from_secs(5)).expect("first register");
        send_json(&mut first, registered_ack());
        std::thread::sleep(Duration::from_millis(200));
        let closed_at = Instant::now();
        let _ = first.close(None);
        drop(first);

        // Second session: the client comes back after the first backoff delay
        let mut second = accept_ws(&listener);
        let reconnect_delay = closed_at.elapsed();
        let register_two = read_frame(&mut second, Duration::from_secs(5)).expect("second register");
        let queued = read_frame(&mut second, Duration::from_secs(5)).expect("queued exception");
        send_json(&mut second, registered_ack());
        std::thread::sleep(Duration::from_millis(300));
        (register_one, register_two, queued, reconnect_delay)
    });

    let config = test_config(port);
    let controller = TransportController::new(config.clone(), Arc::new(BreakpointRegistry::new()));
    controller.start();
    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));

    // Outage: wait for the close to land, then capture while disconnected
    assert!(wait_until(Duration::from_secs(5), || !controller.is_connected()));
    controller.send_exception(sample_capture(&config));
    assert!(controller.reconnect_attempts() >= 1);

    // Restored session re-registers, flushes the queue, and resets attempts
    assert!(wait_until(Duration::from_secs(10), || controller.is_authenticated()));
    assert_eq!(controller.reconnect_attempts(), 0);

    let (register_one, register_two, queued, reconnect_delay) = server.join().unwrap();
    assert_eq!(register_one["type"], "register");
    assert_eq!(register_two["type"], "register");
    // Register precedes anything queued during the outage on the new session
    assert_eq!(queued["type"], "exception");
    // First backoff step is one second
    assert!(
        reconnect_delay >= Duration::from_millis(900),
        "reconnected after {reconnect_delay:?}"
    );

    controller.shutdown();
}

#[test]
fn test_auth_error_is_terminal() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(
            &mut ws,
            json!({"type": "error", "payload": {"code": "invalid_api_key", "message": "unknown key"}}),
        );
        // Give the client time to process, then observe the close
        read_frame(&mut ws, Duration::from_secs(2))
    });

    let controller =
        TransportController::new(test_config(port), Arc::new(BreakpointRegistry::new()));
    controller.start();

    assert!(wait_until(Duration::from_secs(5), || !controller.should_reconnect()));
    assert!(wait_until(Duration::from_secs(5), || !controller.is_connected()));
    assert!(!controller.is_authenticated());
    assert_eq!(controller.state(), ConnectionState::Closed);

    let _ = server.join().unwrap();
    controller.shutdown();
}

#[test]
fn test_non_auth_error_keeps_session() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        send_json(
            &mut ws,
            json!({"type": "error", "payload": {"code": "rate_limited", "message": "slow down"}}),
        );
        std::thread::sleep(Duration::from_millis(400));
    });

    let controller =
        TransportController::new(test_config(port), Arc::new(BreakpointRegistry::new()));
    controller.start();
    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));

    // Still connected and willing to reconnect after a non-terminal error
    std::thread::sleep(Duration::from_millis(200));
    assert!(controller.is_connected());
    assert!(controller.should_reconnect());

    server.join().unwrap();
    controller.shutdown();
}

#[test]
fn test_shutdown_clears_reconnect_and_closes() {
    let (listener, port) = listener();
    let server = std::thread::spawn(move || {
        let mut ws = accept_ws(&listener);
        let _register = read_frame(&mut ws, Duration::from_secs(5));
        send_json(&mut ws, registered_ack());
        // Drain until the client goes away
        drain_frames(&mut ws, Duration::from_secs(2))
    });

    let controller = TransportController::with_heartbeat_period(
        test_config(port),
        Arc::new(BreakpointRegistry::new()),
        Duration::from_millis(100),
    );
    controller.start();
    assert!(wait_until(Duration::from_secs(5), || controller.is_authenticated()));

    controller.shutdown();
    controller.shutdown(); // idempotent
    assert!(!controller.should_reconnect());
    assert!(!controller.is_connected());
    assert!(!controller.is_authenticated());

    // No reconnect arrives at the server after shutdown
    let _ = server.join().unwrap();
}
