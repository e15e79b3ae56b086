mod browse;
pub mod dto;
pub mod response;
mod router;
mod sessions;
mod watch;

pub use router::{AppState, create_router};
pub use watch::spawn_stamp_watcher;
