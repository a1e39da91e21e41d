use std::sync::Arc;
use warp::Filter;

use super::board_websocket;
use crate::board::RoomRegistry;

/// All HTTP routes of the board server.
pub fn board_routes(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    board_websocket_route(registry.clone()).or(board_health_check(registry))
}

/// WebSocket upgrade on `/ws`
pub fn board_websocket_route(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_registry(registry))
        .map(|ws: warp::ws::Ws, registry: Arc<RoomRegistry>| {
            ws.on_upgrade(move |websocket| {
                board_websocket::handle_board_websocket(websocket, registry)
            })
        })
}

pub fn board_health_check(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry))
        .then(|registry: Arc<RoomRegistry>| async move {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Idea Board",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": registry.room_count().await
            }))
        })
}

fn with_registry(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = (Arc<RoomRegistry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}
