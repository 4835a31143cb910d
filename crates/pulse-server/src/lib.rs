pub mod chat;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod stream;
pub mod watcher;

pub use chat::ChatService;
pub use client::{ClientRegistry, Connection, RegistryError};
pub use dispatch::Dispatcher;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use watcher::{spawn_watcher, ChangeSource};
