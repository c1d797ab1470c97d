pub mod feishu;
pub mod memory;
pub mod postgres;

pub use feishu::FeishuNotifier;
pub use memory::MemoryQueueStore;
pub use postgres::PostgresQueueStore;
