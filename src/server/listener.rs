use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::gateway::Gateway;
use crate::http::connection::Connection;

/// Bind `addr` and serve connections until the task is dropped
pub async fn run(addr: &str, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, gateway).await
}

/// Accept loop over an already bound listener, one task per connection
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, gateway);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
