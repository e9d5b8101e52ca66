use courier_core::{rpc_service, CancellationToken, RpcContext, RpcEvent, RpcServer};

#[rpc_service]
pub trait Notes {
    fn list(&self) -> Vec<String>;
    #[rpc(rename = "append")]
    fn add(&self, text: String, token: CancellationToken) -> Result<usize, String>;
    fn on_added(&self) -> RpcEvent<String>;
}

struct Memory {
    added: RpcEvent<String>,
}

#[courier_core::async_trait]
impl NotesServer for Memory {
    async fn list(&self, _ctx: &RpcContext) -> Vec<String> {
        Vec::new()
    }

    async fn add(&self, _ctx: &RpcContext, text: String) -> Result<usize, String> {
        self.added.send_all(text, &[]);
        Ok(1)
    }

    fn on_added(&self) -> &RpcEvent<String> {
        &self.added
    }
}

fn main() {
    let dispatcher = NotesDispatcher::new(Memory {
        added: RpcEvent::new(),
    });
    assert!(dispatcher.shape().method("$append").is_some());
    assert!(dispatcher.shape().event("on_added").is_some());
    let _server: std::sync::Arc<dyn RpcServer> = dispatcher.into_rpc_server();
}
