//! Poll/match/reply loop driving the bot.

mod bot;
mod report;

pub use bot::ReplyBot;
pub use report::{CycleReport, RunSummary};
