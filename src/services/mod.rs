pub mod assistant;
pub mod conversation;
pub mod today;

pub use assistant::{Assistant, AssistantSettings, Outcome};
pub use today::{Dashboard, TodaySummary};
