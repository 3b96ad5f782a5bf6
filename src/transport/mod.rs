pub mod http;
pub mod traits;
pub mod ws_client;
pub mod ws_server;

pub use http::HttpAdapter;
pub use traits::LinkAdapter;
pub use ws_client::WsClientAdapter;
pub use ws_server::WsServerAdapter;

use crate::config::{LinkConfig, LinkMode};

/// Build the adapter selected by the link configuration
pub fn from_config(config: &LinkConfig) -> Box<dyn LinkAdapter> {
    match config.mode {
        LinkMode::WsClient => Box::new(WsClientAdapter::from_config(config)),
        LinkMode::WsServer => Box::new(WsServerAdapter::new(config.bind.clone())),
        LinkMode::Http => Box::new(HttpAdapter::new(config.bind.clone())),
    }
}
