use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warp::Filter;

/// Liveness endpoint for the hosting platform.
pub fn routes() -> impl Filter<Extract = (&'static str,), Error = warp::Rejection> + Clone {
    warp::get().and(warp::path::end()).map(|| "Bot działa!")
}

pub async fn serve(port: u16, shutdown: CancellationToken) {
    let bound = warp::serve(routes())
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            shutdown.cancelled().await
        });
    match bound {
        Ok((addr, server)) => {
            info!(%addr, "health check listening");
            server.await;
        }
        Err(e) => error!(port, "health check could not bind: {e}"),
    }
}
