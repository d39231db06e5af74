pub mod rpc_client;
pub mod template_manager;
pub mod templates;

pub use rpc_client::DaemonClient;
pub use template_manager::TemplateManager;
pub use templates::{
    BeamBlockTemplate, BlockTemplate, EquihashBlockTemplate, KaspaBlockHeader, KaspaBlockTemplate,
};
