pub mod codec;
pub mod correlation;
pub mod error;
pub mod gateway;
pub mod supervisor;

pub use error::GatewayError;
pub use gateway::{RpcGateway, SUGGEST_TOOL_NAME};
pub use supervisor::{ProcessState, ToolServerConfig};
