pub mod poller;

pub use poller::{BadgePoller, RunSummary};
