use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use um_protocol::{Command, ErrorInfo, LoadStatus, UPDATE_REQUEST_ID};

use super::*;
use crate::bridge::BridgeEndpoint;
use crate::dispatch::Outcome;
use crate::testing::{FakeHost, HostCall, auto_connect, echo, responder, spawn_context};

fn router_with_host() -> (Router, Arc<FakeHost>, mpsc::UnboundedReceiver<HostCall>) {
	let (host, calls) = FakeHost::new();
	let router = Router::new(host.clone() as Arc<dyn HostEnvironment>, RouterConfig::default());
	(router, host, calls)
}

/// Registers a pinned, settled context that echoes requests.
fn active_context(router: &Router, host: &FakeHost, url: &str) -> ContextId {
	let id = host.add_context(url, LoadStatus::Complete, false);
	spawn_context(router, id, echo(id));
	router.acquirer().set_pinned(Some(id));
	id
}

#[tokio::test]
async fn test_ping_without_url_is_local() {
	let (router, host, _calls) = router_with_host();
	let reply = router.dispatch(&json!({"type": "a.b.NumberPing", "number": 5})).await.unwrap();
	assert_eq!(reply, json!(5));
	assert!(host.calls().is_empty());
	assert!(router.correlations().is_empty());
}

#[tokio::test]
async fn test_ping_with_url_acquires_and_forwards_once() {
	let (router, host, calls) = router_with_host();
	let forwarded = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&forwarded);
	let _agent = auto_connect(&router, host.clone(), calls, move |id| {
		let counter = Arc::clone(&counter);
		responder(move |data| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(json!({"pong": data["number"], "context": id}))
		})
	});

	let reply = router
		.dispatch(&json!({"type": "Ping", "number": 5, "url": "https://music.example.com/x"}))
		.await
		.unwrap();
	assert_eq!(reply["pong"], 5);
	assert_eq!(forwarded.load(Ordering::SeqCst), 1);
	assert_eq!(host.creations(), 1);
	assert_eq!(
		host.calls()
			.iter()
			.filter(|call| matches!(call, HostCall::Query(_)))
			.count(),
		1
	);
}

#[tokio::test]
async fn test_ping_with_url_leaves_pinned_context_alone() {
	let (router, host, calls) = router_with_host();
	let song = active_context(&router, &host, "https://song.org/track");
	let _agent = auto_connect(&router, host.clone(), calls, echo);

	let reply = router
		.dispatch(&json!({"type": "Ping", "number": 1, "url": "https://other.net/x"}))
		.await
		.unwrap();
	let pinged = ContextId(reply["context"].as_u64().unwrap());
	assert_ne!(pinged, song);
	assert!(host.calls().contains(&HostCall::Create {
		id: pinged,
		url: "https://other.net/x".into(),
		muted: true,
	}));
	assert!(host.calls().contains(&HostCall::Close(pinged)));
	assert_eq!(router.acquirer().pinned(), Some(song));

	let reply = router.dispatch(&json!({"type": "QueryTime"})).await.unwrap();
	assert_eq!(reply["context"], json!(song));
	assert!(!host.calls().contains(&HostCall::Close(song)));
}

#[tokio::test]
async fn test_query_status_without_active_context_is_empty() {
	let (router, host, _calls) = router_with_host();
	let reply = router.dispatch(&json!({"type": "QueryStatus"})).await.unwrap();
	assert_eq!(reply, json!("EMPTY"));
	assert!(host.calls().is_empty());
	assert!(router.correlations().is_empty());

	// A pinned context that is not connected is not active either.
	router.acquirer().set_pinned(Some(ContextId(40)));
	assert_eq!(router.dispatch(&json!({"type": "QueryStatus"})).await.unwrap(), json!("EMPTY"));
}

#[tokio::test]
async fn test_playback_queries_go_to_active_context() {
	let (router, host, _calls) = router_with_host();
	let id = active_context(&router, &host, "https://music.example.com/song");

	for payload in [
		json!({"type": "QueryStatus"}),
		json!({"type": "x.QueryTime"}),
		json!({"type": "QueryLength"}),
		json!({"type": "CommandSetPlayback", "status": "PLAY"}),
		json!({"type": "CommandSeek", "time": 1000}),
		json!({"type": "QuerySongData"}),
	] {
		let reply = router.dispatch(&payload).await.unwrap();
		assert_eq!(reply["echo"], payload);
		assert_eq!(reply["context"], json!(id));
	}
	assert!(router.correlations().is_empty());
}

#[tokio::test]
async fn test_forwarded_query_without_active_context_is_routing_error() {
	let (router, _host, _calls) = router_with_host();
	let err = router.dispatch(&json!({"type": "QueryTime"})).await.unwrap_err();
	assert_eq!(err.kind(), "RoutingError");
}

#[tokio::test]
async fn test_out_of_order_responses_resolve_by_id() {
	let (router, _host, _calls) = router_with_host();
	let (port_a, mut rx_a) = router.connect_context(ContextId(1));
	let (port_b, mut rx_b) = router.connect_context(ContextId(2));

	let first = {
		let router = router.clone();
		tokio::spawn(async move { router.forward(&port_a, json!("to a")).await })
	};
	let second = {
		let router = router.clone();
		tokio::spawn(async move { router.forward(&port_b, json!("to b")).await })
	};

	let request_a: ContextRequest = serde_json::from_value(rx_a.recv().await.unwrap()).unwrap();
	let request_b: ContextRequest = serde_json::from_value(rx_b.recv().await.unwrap()).unwrap();
	assert_ne!(request_a.num, request_b.num);

	router.context_message(
		ContextId(2),
		json!({"type": "response", "num": request_b.num, "data": "from b"}),
	);
	let b = second.await.unwrap().unwrap();
	assert_eq!(b, json!("from b"));
	assert!(!first.is_finished());

	router.context_message(
		ContextId(1),
		json!({"type": "response", "num": request_a.num, "data": "from a"}),
	);
	assert_eq!(first.await.unwrap().unwrap(), json!("from a"));
}

#[tokio::test]
async fn test_answer_from_other_context_is_ignored() {
	let (router, _host, _calls) = router_with_host();
	let (port, mut rx) = router.connect_context(ContextId(1));
	let (_other, _other_rx) = router.connect_context(ContextId(2));

	let pending = {
		let router = router.clone();
		tokio::spawn(async move { router.forward(&port, json!("to 1")).await })
	};
	let request: ContextRequest = serde_json::from_value(rx.recv().await.unwrap()).unwrap();

	router.context_message(
		ContextId(2),
		json!({"type": "response", "num": request.num, "data": "forged"}),
	);
	router.context_message(
		ContextId(2),
		json!({"type": "error", "num": request.num, "error": {"name": "Boom", "message": "x"}}),
	);
	assert!(router.correlations().contains(request.num));
	assert!(!pending.is_finished());

	router.context_message(
		ContextId(1),
		json!({"type": "response", "num": request.num, "data": "real"}),
	);
	assert_eq!(pending.await.unwrap().unwrap(), json!("real"));
}

#[tokio::test]
async fn test_reconnect_rejects_requests_on_replaced_channel() {
	let (router, _host, _calls) = router_with_host();
	let (old, mut old_rx) = router.connect_context(ContextId(5));

	let pending = {
		let router = router.clone();
		let old = old.clone();
		tokio::spawn(async move { router.forward(&old, json!("lost")).await })
	};
	old_rx.recv().await.unwrap();

	let (new, _new_rx) = router.connect_context(ContextId(5));
	let err = pending.await.unwrap().unwrap_err();
	assert_eq!(err.to_error_info().name, "ContextLostError");
	assert!(router.correlations().is_empty());

	assert!(!router.disconnect_context(&old));
	assert!(router.registry().lookup(ContextId(5)).unwrap().same_channel(&new));
}

#[tokio::test]
async fn test_disconnect_rejects_outstanding_requests() {
	let (router, _host, _calls) = router_with_host();
	let (port, mut rx) = router.connect_context(ContextId(7));

	let pending: Vec<_> = (0..2)
		.map(|i| {
			let router = router.clone();
			let port = port.clone();
			tokio::spawn(async move { router.forward(&port, json!(i)).await })
		})
		.collect();
	rx.recv().await.unwrap();
	rx.recv().await.unwrap();
	assert_eq!(router.correlations().len(), 2);

	assert!(router.disconnect_context(&port));
	assert!(router.registry().lookup(ContextId(7)).is_none());
	for task in pending {
		let err = task.await.unwrap().unwrap_err();
		assert_eq!(err.to_error_info().name, "ContextLostError");
	}
	assert!(router.correlations().is_empty());
}

#[tokio::test]
async fn test_context_error_reply_keeps_remote_identity() {
	let (router, host, _calls) = router_with_host();
	let id = host.add_context("https://a.org/", LoadStatus::Complete, false);
	spawn_context(
		&router,
		id,
		responder(|_| {
			let mut info = ErrorInfo::new("TypeError", "This is a foreground test");
			info.stack = Some("handleMessage".into());
			Err(info)
		}),
	);
	router.acquirer().set_pinned(Some(id));

	let err = router
		.dispatch(&json!({"type": "CommandError", "forward": true}))
		.await
		.unwrap_err();
	let info = err.to_error_info();
	assert_eq!(info.name, "TypeError");
	assert_eq!(info.message, "This is a foreground test");
	assert_eq!(info.stack.as_deref(), Some("handleMessage"));
}

#[tokio::test]
async fn test_report_error_local_is_a_fault() {
	let (router, host, _calls) = router_with_host();
	active_context(&router, &host, "https://a.org/");

	let err = router
		.dispatch(&json!({"type": "CommandError", "forward": false, "detail": "why"}))
		.await
		.unwrap_err();
	assert_eq!(err.kind(), "LocalFault");
	assert!(err.to_string().contains("why"));
	assert!(router.correlations().is_empty());

	let forwarded = router
		.dispatch(&json!({"type": "ReportError", "forward": true}))
		.await
		.unwrap();
	assert_eq!(forwarded["echo"]["type"], "ReportError");
}

#[tokio::test]
async fn test_updates_never_touch_correlations() {
	let (router, _host, _calls) = router_with_host();
	let (bridge, mut outbound) = BridgeEndpoint::new();
	router.relay().attach(bridge);
	let (port, mut rx) = router.connect_context(ContextId(3));

	let waiting = {
		let router = router.clone();
		tokio::spawn(async move { router.forward(&port, json!("status?")).await })
	};
	let request: ContextRequest = serde_json::from_value(rx.recv().await.unwrap()).unwrap();

	for i in 0..20 {
		router.context_message(ContextId(3), json!({"type": "update", "data": {"tick": i}}));
		// An update can never be mistaken for a response carrying the reserved id.
		router.context_message(ContextId(3), json!({"type": "response", "num": -1, "data": "bogus"}));
	}
	assert_eq!(router.correlations().len(), 1);
	assert!(!waiting.is_finished());

	router.context_message(
		ContextId(3),
		json!({"type": "response", "num": request.num, "data": "PLAYING"}),
	);
	assert_eq!(waiting.await.unwrap().unwrap(), json!("PLAYING"));

	for i in 0..20 {
		let frame = outbound.recv().await.unwrap();
		assert_eq!(frame["requestId"], UPDATE_REQUEST_ID);
		assert_eq!(frame["result"]["value"]["tick"], i);
	}
}

#[tokio::test]
async fn test_load_song_replaces_pinned_context() {
	let (router, host, _calls) = router_with_host();
	let old = active_context(&router, &host, "https://a.org/old");

	let reply = router
		.dispatch(&json!({"type": "CommandLoadSong", "song": "https://b.org/new"}))
		.await
		.unwrap();
	assert_eq!(reply, Value::Null);

	let calls = host.calls();
	let closed_at = calls.iter().position(|c| *c == HostCall::Close(old)).unwrap();
	let created_at = calls
		.iter()
		.position(|c| matches!(c, HostCall::Create { url, muted: false, .. } if url == "https://b.org/new"))
		.unwrap();
	assert!(closed_at < created_at);
	let pinned = router.acquirer().pinned().unwrap();
	assert_ne!(pinned, old);
	assert_eq!(host.info(pinned).unwrap().status, LoadStatus::Loading);
}

#[tokio::test]
async fn test_quit_closes_every_context() {
	let (router, host, mut calls) = router_with_host();
	let pinned = active_context(&router, &host, "https://a.org/");
	let other = host.add_context("https://b.org/", LoadStatus::Loading, true);

	router.dispatch(&json!("quit")).await.unwrap();
	assert_eq!(router.acquirer().pinned(), None);

	let mut closed = Vec::new();
	while closed.len() < 2 {
		if let HostCall::Close(id) = calls.recv().await.unwrap() {
			closed.push(id);
		}
	}
	closed.sort();
	assert_eq!(closed, vec![pinned, other]);
	assert!(host.calls().contains(&HostCall::Query(ALL_URLS.to_string())));
}

#[tokio::test]
async fn test_query_song_data_uses_disposable_context() {
	let (router, host, calls) = router_with_host();
	let pinned = active_context(&router, &host, "https://music.example.com/playing");
	let _agent = auto_connect(&router, host.clone(), calls, |_| {
		responder(|_| Ok(json!({"title": "Song", "artists": ["A"]})))
	});

	let reply = router
		.dispatch(&json!({"type": "QuerySongData", "url": "https://music.example.com/other"}))
		.await
		.unwrap();
	assert_eq!(reply["title"], "Song");

	let calls = host.calls();
	let Some(HostCall::Create { id, muted, .. }) = calls.iter().find(|c| matches!(c, HostCall::Create { .. })).cloned()
	else {
		panic!("no context created: {calls:?}");
	};
	assert!(muted);
	assert!(calls.contains(&HostCall::WaitSettled(id)));
	assert!(calls.contains(&HostCall::Close(id)));
	assert_eq!(router.acquirer().pinned(), Some(pinned));
	assert!(
		!calls
			.iter()
			.any(|c| matches!(c, HostCall::Navigate { id: nav, .. } if *nav == pinned))
	);
}

#[tokio::test(start_paused = true)]
async fn test_hung_context_times_out() {
	let (host, _calls) = FakeHost::new();
	let config = RouterConfig::default().with_request_timeout(Some(Duration::from_secs(2)));
	let router = Router::new(host.clone() as Arc<dyn HostEnvironment>, config);
	let (port, _rx) = router.connect_context(ContextId(1));
	router.acquirer().set_pinned(Some(ContextId(1)));

	let err = router.dispatch(&json!({"type": "QueryTime"})).await.unwrap_err();
	assert!(err.is_timeout());
	assert_eq!(err.to_error_info().name, "TimeoutError");
	assert!(router.correlations().is_empty());
	drop(port);
}

#[tokio::test]
async fn test_host_removed_forgets_context() {
	let (router, host, _calls) = router_with_host();
	let id = active_context(&router, &host, "https://a.org/");
	let waiter = router.registry().expect_port(id);

	router.host_removed(id);
	assert_eq!(router.acquirer().pinned(), None);
	assert!(router.registry().lookup(id).is_none());
	assert!(waiter.wait(None).await.unwrap_err().is_context_lost());
	assert_eq!(router.dispatch(&json!({"type": "QueryStatus"})).await.unwrap(), json!("EMPTY"));
}

#[tokio::test]
async fn test_custom_handlers_run_after_builtins() {
	let (router, _host, _calls) = router_with_host();
	router.add_handler(|command: &Command, _: &Value, previous: Option<Outcome>| -> Result<Option<Outcome>> {
		match command {
			Command::Unknown { tag: Some(tag) } if tag.ends_with("Volume") => Ok(Some(Outcome::ready(11))),
			_ => Ok(previous),
		}
	});

	assert_eq!(router.dispatch(&json!({"type": "x.Volume"})).await.unwrap(), json!(11));
	assert_eq!(router.dispatch(&json!({"type": "x.Dance"})).await.unwrap(), json!("pong"));
	assert_eq!(
		router.dispatch(&json!({"type": "Ping", "number": 2})).await.unwrap(),
		json!(2)
	);
}

async fn write_frame(writer: &mut (impl AsyncWriteExt + Unpin), value: &Value) {
	let bytes = serde_json::to_vec(value).unwrap();
	writer.write_all(&(bytes.len() as u32).to_ne_bytes()).await.unwrap();
	writer.write_all(&bytes).await.unwrap();
}

async fn read_frame(reader: &mut (impl AsyncReadExt + Unpin)) -> Value {
	let mut len = [0u8; 4];
	reader.read_exact(&mut len).await.unwrap();
	let mut body = vec![0u8; u32::from_ne_bytes(len) as usize];
	reader.read_exact(&mut body).await.unwrap();
	serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_serve_answers_every_request_once() {
	let (router, _host, _calls) = router_with_host();
	let (mut client_out, server_in) = tokio::io::duplex(64 * 1024);
	let (server_out, mut client_in) = tokio::io::duplex(64 * 1024);

	let session = {
		let router = router.clone();
		tokio::spawn(async move { router.serve(server_out, server_in).await })
	};

	write_frame(&mut client_out, &json!({"requestId": 1, "payload": {"type": "NumberPing", "number": 5}})).await;
	write_frame(&mut client_out, &json!({"requestId": 2, "payload": {"type": "QueryStatus"}})).await;
	write_frame(&mut client_out, &json!({"requestId": 3, "payload": {"type": "CommandError"}})).await;
	write_frame(&mut client_out, &json!({"messageNum": 4, "message": "hello"})).await;

	let mut replies = std::collections::BTreeMap::new();
	for _ in 0..4 {
		let frame = read_frame(&mut client_in).await;
		let id = frame["requestId"].as_i64().unwrap();
		assert!(replies.insert(id, frame).is_none(), "duplicate reply for {id}");
	}
	assert_eq!(replies[&1]["result"]["value"], 5);
	assert_eq!(replies[&2]["result"]["value"], "EMPTY");
	assert_eq!(replies[&3]["result"]["error"]["name"], "LocalFault");
	assert_eq!(replies[&4]["result"]["value"], "pong");

	// Updates reach the same channel while the session is up.
	router.context_message(ContextId(9), json!({"type": "update", "data": "loaded"}));
	let update = read_frame(&mut client_in).await;
	assert_eq!(update["requestId"], -1);
	assert_eq!(update["result"]["value"], "loaded");

	drop(client_out);
	assert!(session.await.unwrap().is_ok());
}
