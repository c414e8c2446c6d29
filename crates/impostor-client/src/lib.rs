pub mod proxy;

pub use proxy::{ProxyError, RoomEvent, RoomProxy};
