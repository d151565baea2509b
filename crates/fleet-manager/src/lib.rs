//! `Manager`: owns a set of `Team`s sharing one `EventBus`, starts them in
//! dependency order, and cascades `Done`/`Failed` transitions across
//! `DependsOn` edges.

mod manager;

pub use manager::Manager;
