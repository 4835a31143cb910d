pub mod events;
pub mod ids;

pub use events::{ChangeEvent, ChangeNotification, ChangeOperation, Collection, EventKind};
