// Integration tests for connection lifecycle and request correlation.
//
// Tests cover:
// - Handshake completion and identity population
// - Shared in-flight connect attempts
// - Handshake timeout, close-before-handshake and destroy mid-connect
// - Failing pending requests when the transport closes
// - Out-of-order replies and unsolicited events

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeExchange, ScriptedTransport, client_with, client_with_config};
use drpc::drpc_protocol::{ActivitySecret, Envelope};
use drpc::{ClientConfig, ClientEvent, CloseReason, Command, ConnectionState, Error, EventKind, RpcEvent};
use serde_json::json;

#[tokio::test]
async fn test_connect_completes_on_ready() {
	let transport = ScriptedTransport::ready();
	let client = client_with(transport.clone(), FakeExchange::new());
	let mut events = client.events();

	assert_eq!(client.state(), ConnectionState::Idle);
	client.connect().await.expect("connect");

	assert_eq!(client.state(), ConnectionState::Connected);
	assert_eq!(events.recv().await, Some(ClientEvent::Connected));

	let user = client.user().expect("handshake user");
	assert_eq!(user.id, "53908232506183680");
	assert_eq!(user.username, "mason");
	assert_eq!(client.server_config().unwrap().cdn_host.as_deref(), Some("cdn.example.com"));

	// Already connected: no second transport attempt.
	client.connect().await.unwrap();
	assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_attempt() {
	let transport = ScriptedTransport::slow(Duration::from_millis(50));
	let client = client_with(transport.clone(), FakeExchange::new());

	let (a, b, c) = tokio::join!(client.connect(), client.connect(), client.connect());
	assert!(a.is_ok() && b.is_ok() && c.is_ok());
	assert_eq!(transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
	let transport = ScriptedTransport::silent();
	let config = ClientConfig::new(common::CLIENT_ID).connect_timeout(Duration::from_secs(10));
	let client = client_with_config(config, transport.clone(), FakeExchange::new());

	let err = client.connect().await.unwrap_err();
	assert!(err.is_timeout(), "Expected ConnectionTimeout, got {err:?}");
	assert_eq!(client.state(), ConnectionState::Disconnected);
	assert_eq!(transport.closes(), 1);

	// A failed attempt does not stick; the next call tries again.
	let _ = client.connect().await;
	assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn test_close_before_handshake_fails_connect() {
	let transport = ScriptedTransport::silent();
	let client = client_with(transport.clone(), FakeExchange::new());

	let connecting = {
		let client = client.clone();
		tokio::spawn(async move { client.connect().await })
	};
	transport.wait_for_connects(1).await;
	transport.close_with(Some(CloseReason {
		code: Some(4000),
		message: "Invalid client ID".into(),
	}));

	match connecting.await.unwrap() {
		Err(Error::ConnectionEnded { code, message }) => {
			assert_eq!(code, Some(4000));
			assert_eq!(message, "Invalid client ID");
		}
		other => panic!("Expected ConnectionEnded, got {other:?}"),
	}
	assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_destroy_abandons_connect_in_progress() {
	let transport = ScriptedTransport::slow(Duration::from_millis(100));
	let client = client_with(transport.clone(), FakeExchange::new());
	let mut events = client.events();

	let connecting = {
		let client = client.clone();
		tokio::spawn(async move { client.connect().await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(client.state(), ConnectionState::Connecting);

	client.destroy().await.unwrap();
	assert_eq!(client.state(), ConnectionState::Disconnected);

	let err = connecting.await.unwrap().unwrap_err();
	assert!(err.is_connection_ended(), "got {err:?}");

	// The abandoned attempt must not come back to life.
	tokio::time::sleep(Duration::from_millis(150)).await;
	assert_eq!(client.state(), ConnectionState::Disconnected);
	assert_eq!(transport.connects(), 1);
	while let Some(event) = events.try_recv() {
		assert_ne!(event, ClientEvent::Connected);
	}

	// A destroyed client can still connect again.
	client.connect().await.unwrap();
	assert_eq!(client.state(), ConnectionState::Connected);
	assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn test_missing_endpoint_propagates() {
	let transport = ScriptedTransport::refusing();
	let client = client_with(transport.clone(), FakeExchange::new());

	let err = client.connect().await.unwrap_err();
	assert!(matches!(err, Error::NoEndpointFound { .. }), "got {err:?}");
	assert_eq!(client.state(), ConnectionState::Disconnected);

	let _ = client.connect().await;
	assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn test_close_fails_every_pending_request() {
	let transport = ScriptedTransport::ready();
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();
	let mut events = client.events();

	let mut requests = Vec::new();
	for i in 0..4 {
		let client = client.clone();
		requests.push(tokio::spawn(async move { client.get_channel(&i.to_string()).await }));
	}
	transport.wait_for_sent(4).await;
	assert_eq!(client.pending_requests(), 4);

	transport.close_with(Some(CloseReason {
		code: Some(1006),
		message: "abnormal closure".into(),
	}));

	for request in requests {
		let err = request.await.unwrap().unwrap_err();
		assert!(err.is_connection_ended(), "got {err:?}");
	}
	assert_eq!(client.pending_requests(), 0);
	assert_eq!(client.state(), ConnectionState::Disconnected);

	match events.recv().await {
		Some(ClientEvent::Disconnected(Some(reason))) => assert_eq!(reason.code, Some(1006)),
		other => panic!("Expected Disconnected, got {other:?}"),
	}

	// Requests after the close fail fast instead of hanging.
	assert!(matches!(client.get_guilds().await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_reconnect_after_disconnect_starts_fresh_cycle() {
	let transport = ScriptedTransport::ready();
	let client = client_with(transport.clone(), FakeExchange::new());

	client.connect().await.unwrap();
	transport.close_with(None);
	let mut state = client.state_changes();
	state.wait_for(|s| *s == ConnectionState::Disconnected).await.unwrap();

	client.connect().await.unwrap();
	assert_eq!(transport.connects(), 2);
	assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_replies_settle_their_own_requests_in_any_order() {
	let transport = ScriptedTransport::ready();
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();

	let mut requests = Vec::new();
	for i in 0..5 {
		let client = client.clone();
		requests.push(tokio::spawn(async move {
			let data = client.request(Command::GetChannel, json!({ "channel_id": i })).await?;
			drpc::Result::Ok((i, data))
		}));
	}

	let sent = transport.wait_for_sent(5).await;
	for payload in sent.iter().rev() {
		transport.push(Envelope::reply(
			Command::GetChannel,
			payload["nonce"].as_str().unwrap(),
			json!({ "id": payload["args"]["channel_id"] }),
		));
	}

	for request in requests {
		let (i, data) = request.await.unwrap().unwrap();
		assert_eq!(data["id"], i);
	}
	assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_remote_error_reply() {
	let transport = ScriptedTransport::ready();
	transport.reply_to(Command::GetGuilds, common::Reply::Error(4006, "Not authenticated or invalid scope"));
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();

	let err = client.get_guilds().await.unwrap_err();
	assert_eq!(err.remote_code(), Some(4006));
}

#[tokio::test]
async fn test_unsolicited_events_reach_handlers_and_stream() {
	let transport = ScriptedTransport::ready();
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();

	let joins = Arc::new(AtomicUsize::new(0));
	let joins_ref = Arc::clone(&joins);
	let _sub = client.on_event(EventKind::ActivityJoin, move |_event| {
		let joins = Arc::clone(&joins_ref);
		async move {
			joins.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	});

	let waiter = client.wait_for_event(
		|e| matches!(e, ClientEvent::Rpc(RpcEvent::ActivityJoin(_))),
		Duration::from_secs(5),
	);

	transport.push(Envelope::dispatch(EventKind::GuildStatus, json!({"guild": {"id": "1"}})));
	transport.push(Envelope::dispatch(EventKind::ActivityJoin, json!({"secret": "match-42"})));

	let event = waiter.wait().await.unwrap();
	assert_eq!(
		event,
		ClientEvent::Rpc(RpcEvent::ActivityJoin(ActivitySecret {
			secret: "match-42".into()
		}))
	);

	for _ in 0..50 {
		if joins.load(Ordering::SeqCst) == 1 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	assert_eq!(joins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_envelope_is_reported_and_skipped() {
	let transport = ScriptedTransport::ready();
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();

	let waiter = client.wait_for_event(|e| matches!(e, ClientEvent::Debug(_)), Duration::from_secs(5));
	transport.push_raw(json!({"cmd": 42}));
	assert!(waiter.wait().await.is_ok());
	assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_subscribe_and_unsubscribe() {
	let transport = ScriptedTransport::ready();
	transport.reply_to(Command::Subscribe, common::Reply::Data(json!({"evt": "ACTIVITY_JOIN"})));
	transport.reply_to(Command::Unsubscribe, common::Reply::Data(json!({"evt": "ACTIVITY_JOIN"})));
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();

	let subscription = client.subscribe(EventKind::ActivityJoin, json!({})).await.unwrap();
	assert_eq!(subscription.event(), EventKind::ActivityJoin);
	subscription.unsubscribe().await.unwrap();

	let sent = transport.sent();
	assert_eq!(sent[0]["cmd"], "SUBSCRIBE");
	assert_eq!(sent[0]["evt"], "ACTIVITY_JOIN");
	assert_eq!(sent[1]["cmd"], "UNSUBSCRIBE");
	assert_eq!(sent[1]["evt"], "ACTIVITY_JOIN");
}

#[tokio::test]
async fn test_set_activity_carries_pid() {
	let transport = ScriptedTransport::ready();
	transport.reply_to(Command::SetActivity, common::Reply::Data(json!({"state": "In a match"})));
	let client = client_with(transport.clone(), FakeExchange::new());
	client.connect().await.unwrap();

	client.set_activity(json!({"state": "In a match"})).await.unwrap();
	client.clear_activity().await.unwrap();

	let sent = transport.sent();
	assert_eq!(sent[0]["args"]["pid"], std::process::id());
	assert_eq!(sent[0]["args"]["activity"]["state"], "In a match");
	assert!(sent[1]["args"].get("activity").is_none());
}
