//! Message queues, wait lists, and pipes (component I): the blocking
//! primitives every `wait_message`/pipe-read/pipe-write syscall bottoms out
//! in. None of these types can fail to construct; they only report
//! full/empty/closed through their operations.

pub mod message_queue;
pub mod pipe;
pub mod wait_list;

pub use message_queue::{Message, MessageQueue};
pub use pipe::Pipe;
pub use wait_list::WaitList;
