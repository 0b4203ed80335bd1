mod mock;
mod rpc;

pub use mock::MockTransport;
pub use rpc::RpcTransport;
