mod periodic;
mod reconciler;

pub use periodic::{jittered_interval, spawn_periodic};
pub use reconciler::{SyncReconciler, SyncReport};
