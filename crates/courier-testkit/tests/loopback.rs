//! Calls and event fan-out through the loopback transport.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use assert_matches::assert_matches;
use courier_core::{
    rpc_service, CancellationToken, DeliveryError, LazyServer, PeerId, ProviderChain, ProxyPath,
    RpcContext, RpcError, RpcEvent, RpcServer, REQUESTING_CONNECTION,
};
use courier_testkit::{init_tracing, EventEnvelope, Fault, LoopbackTransport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub revision: u32,
}

#[rpc_service(name = "files")]
pub trait Files {
    fn save(&self, path: String) -> u32;
    fn notify(&self, path: String, targets: Vec<PeerId>);
    fn connection(&self) -> Option<u64>;
    async fn watch(&self, path: String, token: CancellationToken) -> bool;
    fn on_changed(&self) -> RpcEvent<Change>;
}

#[derive(Default)]
struct FileServer {
    changed: RpcEvent<Change>,
    revision: AtomicU32,
}

#[courier_core::async_trait]
impl FilesServer for FileServer {
    async fn save(&self, ctx: &RpcContext, path: String) -> u32 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.changed.send_all(Change { path, revision }, &[*ctx.sender()]);
        revision
    }

    async fn notify(&self, _ctx: &RpcContext, path: String, targets: Vec<PeerId>) {
        self.changed.send_to(Change { path, revision: 0 }, &targets);
    }

    async fn connection(&self, ctx: &RpcContext) -> Option<u64> {
        ctx.get(&REQUESTING_CONNECTION).map(|connection| connection.0)
    }

    async fn watch(&self, ctx: &RpcContext, _path: String) -> bool {
        match ctx.request() {
            Some(token) => {
                token.cancelled().await;
                true
            }
            None => false,
        }
    }

    fn on_changed(&self) -> &RpcEvent<Change> {
        &self.changed
    }
}

/// Grid cells keyed by coordinate; tuple keys have no JSON form
type Marks = BTreeMap<(u32, u32), bool>;

#[rpc_service(name = "board")]
pub trait Board {
    fn post(&self, text: String);
    fn mark(&self, x: u32, y: u32);
    fn on_post(&self) -> RpcEvent<String>;
    fn on_marks(&self) -> RpcEvent<Marks>;
}

#[derive(Default)]
struct Corkboard {
    posted: RpcEvent<String>,
    marks: RpcEvent<Marks>,
}

#[courier_core::async_trait]
impl BoardServer for Corkboard {
    async fn post(&self, ctx: &RpcContext, text: String) {
        self.posted.send_all(text, &[*ctx.sender()]);
    }

    async fn mark(&self, ctx: &RpcContext, x: u32, y: u32) {
        self.marks
            .send_all(BTreeMap::from([((x, y), true)]), &[*ctx.sender()]);
    }

    fn on_post(&self) -> &RpcEvent<String> {
        &self.posted
    }

    fn on_marks(&self) -> &RpcEvent<Marks> {
        &self.marks
    }
}

/// Transport whose provider builds a fresh board on every request
fn board_transport(built: Arc<AtomicU32>) -> LoopbackTransport {
    init_tracing();
    let providers =
        ProviderChain::new().with(move |path: &ProxyPath| -> Option<Arc<dyn RpcServer>> {
            (path.as_str() == "board").then(|| {
                built.fetch_add(1, Ordering::SeqCst);
                BoardDispatcher::new(Corkboard::default()).into_rpc_server()
            })
        });
    LoopbackTransport::new(providers)
}

fn files_path() -> ProxyPath {
    ProxyPath::from("files")
}

fn transport() -> LoopbackTransport {
    init_tracing();
    let providers = ProviderChain::new().with(LazyServer::new("files", || {
        FilesDispatcher::new(FileServer::default()).into_rpc_server()
    }));
    let transport = LoopbackTransport::new(providers);
    transport.bind_event(&files_path(), "on_changed").unwrap();
    transport
}

fn change(envelope: &EventEnvelope) -> Change {
    assert_eq!(envelope.path, files_path());
    assert_eq!(envelope.event, "on_changed");
    serde_json::from_value(envelope.payload.clone()).unwrap()
}

#[tokio::test]
async fn test_send_all_skips_the_originator() {
    let transport = transport();
    let mut alice = transport.connect(PeerId::from_label("alice"));
    let mut bob = transport.connect(PeerId::from_label("bob"));
    let mut carol = transport.connect(PeerId::from_label("carol"));

    let reply = transport
        .call(alice.peer(), &files_path(), "$save", vec![json!("a.txt")])
        .await
        .unwrap();
    assert_eq!(reply, json!(1));

    assert!(alice.drain().is_empty());
    let expected = Change {
        path: "a.txt".into(),
        revision: 1,
    };
    assert_eq!(change(&bob.recv().await.unwrap()), expected);
    assert_eq!(change(&carol.recv().await.unwrap()), expected);
}

#[tokio::test]
async fn test_send_to_reaches_exactly_the_targets() {
    let transport = transport();
    let mut alice = transport.connect(PeerId::from_label("alice"));
    let mut bob = transport.connect(PeerId::from_label("bob"));
    let mut carol = transport.connect(PeerId::from_label("carol"));

    transport
        .call(
            alice.peer(),
            &files_path(),
            "$notify",
            vec![json!("b.txt"), json!([bob.peer(), bob.peer()])],
        )
        .await
        .unwrap();

    assert!(alice.drain().is_empty());
    assert!(carol.drain().is_empty());
    let received = bob.drain();
    assert_eq!(received.len(), 1);
    assert_eq!(change(&received[0]).path, "b.txt");
}

#[tokio::test]
async fn test_events_arrive_in_publish_order() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));
    let mut bob = transport.connect(PeerId::from_label("bob"));

    for name in ["1.txt", "2.txt", "3.txt"] {
        transport
            .call(alice.peer(), &files_path(), "$save", vec![json!(name)])
            .await
            .unwrap();
    }

    let revisions: Vec<u32> = bob.drain().iter().map(|e| change(e).revision).collect();
    assert_eq!(revisions, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_delivery_does_not_stop_other_peers() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));
    let bob = transport.connect(PeerId::from_label("bob"));
    let mut carol = transport.connect(PeerId::from_label("carol"));
    let mut dave = transport.connect(PeerId::from_label("dave"));

    transport.faults().fail(*bob.peer(), Fault::Panic);

    let reply = transport
        .call(alice.peer(), &files_path(), "$save", vec![json!("c.txt")])
        .await
        .unwrap();
    assert_eq!(reply, json!(1));

    assert_eq!(change(&carol.recv().await.unwrap()).path, "c.txt");
    assert_eq!(change(&dave.recv().await.unwrap()).path, "c.txt");

    let failures = transport.delivery_log().drain();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].peer, *bob.peer());
    assert_matches!(failures[0].error, DeliveryError::Panicked { .. });
}

#[tokio::test]
async fn test_disconnected_peers_are_not_delivered_to() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));
    let mut bob = transport.connect(PeerId::from_label("bob"));

    transport.disconnect(bob.peer());
    assert_eq!(transport.connected_peers(), vec![*alice.peer()]);

    transport
        .call(alice.peer(), &files_path(), "$save", vec![json!("d.txt")])
        .await
        .unwrap();

    assert!(bob.recv().await.is_none());
    assert!(transport.delivery_log().is_empty());
}

#[tokio::test]
async fn test_send_to_disconnected_target_is_recorded() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));
    let ghost = PeerId::from_label("ghost");

    transport
        .call(
            alice.peer(),
            &files_path(),
            "$notify",
            vec![json!("e.txt"), json!([ghost])],
        )
        .await
        .unwrap();

    let failures = transport.delivery_log().drain();
    assert_eq!(failures.len(), 1);
    assert_matches!(&failures[0].error, DeliveryError::Disconnected { peer } if *peer == ghost);
}

#[tokio::test]
async fn test_each_call_sees_its_own_connection() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));
    let bob = transport.connect(PeerId::from_label("bob"));

    let from_alice = transport
        .call(alice.peer(), &files_path(), "$connection", Vec::new())
        .await
        .unwrap();
    let from_bob = transport
        .call(bob.peer(), &files_path(), "$connection", Vec::new())
        .await
        .unwrap();
    let from_stranger = transport
        .call(
            &PeerId::from_label("stranger"),
            &files_path(),
            "$connection",
            Vec::new(),
        )
        .await
        .unwrap();

    assert_eq!(from_alice, json!(alice.connection().0));
    assert_eq!(from_bob, json!(bob.connection().0));
    assert_eq!(from_stranger, json!(null));
}

#[tokio::test]
async fn test_cancellable_call_observes_cancellation() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));
    let path = files_path();

    let (token, call) =
        transport.call_cancellable(alice.peer(), &path, "$watch", vec![json!("f.txt")]);
    token.cancel();

    assert_eq!(call.await.unwrap(), json!(true));

    let plain = transport
        .call(alice.peer(), &path, "$watch", vec![json!("f.txt")])
        .await
        .unwrap();
    assert_eq!(plain, json!(false));
}

#[tokio::test]
async fn test_unhandled_paths_and_unknown_events() {
    let transport = transport();
    let alice = transport.connect(PeerId::from_label("alice"));

    assert_matches!(
        transport
            .call(alice.peer(), &"settings".into(), "$get", Vec::new())
            .await,
        Err(RpcError::Unhandled { path }) if path == "settings"
    );
    assert_matches!(
        transport.bind_event(&files_path(), "$save"),
        Err(RpcError::UnknownMethod { .. })
    );
}

#[test]
fn test_generated_shape_matches_server() {
    let server: Arc<dyn RpcServer> = FilesDispatcher::new(FileServer::default()).into_rpc_server();
    let shape = server.shape();
    assert_eq!(shape.service(), "files");
    assert!(shape.method("$watch").unwrap().cancellable);
    assert_eq!(shape.event("on_changed").unwrap().payload, "Change");
}

#[tokio::test]
async fn test_calls_reach_the_server_whose_events_are_bound() {
    let built = Arc::new(AtomicU32::new(0));
    let transport = board_transport(Arc::clone(&built));
    let board = ProxyPath::from("board");
    transport.bind_event(&board, "on_post").unwrap();

    let alice = transport.connect(PeerId::from_label("alice"));
    let mut bob = transport.connect(PeerId::from_label("bob"));

    for text in ["first", "second"] {
        transport
            .call(alice.peer(), &board, "$post", vec![json!(text)])
            .await
            .unwrap();
    }

    let payloads: Vec<_> = bob.drain().into_iter().map(|e| e.payload).collect();
    assert_eq!(payloads, vec![json!("first"), json!("second")]);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(
        &transport.server_for(&board).unwrap(),
        &transport.server_for(&board).unwrap()
    ));
}

#[tokio::test]
async fn test_unencodable_payloads_are_recorded_per_recipient() {
    let transport = board_transport(Arc::new(AtomicU32::new(0)));
    let board = ProxyPath::from("board");
    transport.bind_event(&board, "on_marks").unwrap();

    let alice = transport.connect(PeerId::from_label("alice"));
    let mut bob = transport.connect(PeerId::from_label("bob"));
    let mut carol = transport.connect(PeerId::from_label("carol"));

    let reply = transport
        .call(alice.peer(), &board, "$mark", vec![json!(1), json!(2)])
        .await
        .unwrap();
    assert_eq!(reply, json!(null));

    assert!(bob.drain().is_empty());
    assert!(carol.drain().is_empty());
    let failures = transport.delivery_log().drain();
    let peers: Vec<PeerId> = failures.iter().map(|f| f.peer).collect();
    assert_eq!(peers, vec![*bob.peer(), *carol.peer()]);
    assert!(failures
        .iter()
        .all(|f| matches!(f.error, DeliveryError::Unencodable { .. })));
}
