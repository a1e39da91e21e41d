pub mod board_routes;
mod board_websocket;

pub use board_routes::board_routes;
