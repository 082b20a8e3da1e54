pub mod handler;
pub mod manager;

pub use handler::Queue;
pub use manager::QueueManager;
