mod arming;
mod next_fire;

pub use arming::TriggerScheduler;
pub use next_fire::next_fire_date;
