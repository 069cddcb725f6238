pub mod aggregate;
pub mod error;
pub mod model;
pub mod time;
pub mod unlock;

pub use aggregate::{ScoreAggregator, TopicAggregate, UserAggregate};
pub use error::Error;
pub use time::Clock;
pub use unlock::{Availability, UnlockPolicy};
