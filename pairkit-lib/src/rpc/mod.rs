//! JSON-RPC correlation layer.

mod interactor;
mod methods;
mod registry;
mod types;

pub use interactor::{NetworkingInteractor, PendingRequestInfo, RequestOptions};
pub use methods::{ProtocolMethod, Scope};
pub use registry::{DispatchError, MethodRegistry};
pub use types::{
    error_codes, ErrorObject, InboundRequest, RpcId, RpcMessage, RpcOutcome, RpcRequest,
    RpcResponse, JSONRPC_VERSION,
};
