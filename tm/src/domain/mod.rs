//! Domain types shared by every component

mod id;
mod message;
mod priority;
mod task;

pub use id::{kind_of, new_id};
pub use message::{Message, Payload};
pub use priority::Priority;
pub use task::{Task, TaskState};
