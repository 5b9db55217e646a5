//! Condition store and log history store: the two append-only write paths
//! the polling scheduler and snapshot cron both go through.

pub mod condition;
pub mod history;

pub use condition::ConditionStore;
pub use history::HistoryStore;
