mod task;
mod ticket;

pub(crate) use task::Task;
pub use ticket::Ticket;
