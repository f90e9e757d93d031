use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use warp::Filter;

use super::routes::{api, handle_rejection};
use crate::controller::Controller;

/// Web server exposing the controller over JSON and server-sent events
pub struct WebServer {
    controller: Arc<Controller>,
}

impl WebServer {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    /// Serves the API on `addr` until the returned future is dropped.
    pub async fn start(&self, addr: SocketAddr) {
        let routes = api(&self.controller)
            .recover(handle_rejection)
            .with(warp::log("catalogd::web"));

        info!("Web interface listening on http://{}", addr);
        warp::serve(routes).run(addr).await;
    }
}
