pub mod error;
pub mod schedule;
pub mod topology;

pub use error::ScheduleError;
pub use schedule::{build_schedule, schedule_processor, Schedule, ScheduleStep, Source, StepInput};
