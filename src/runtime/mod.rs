pub mod controller;

pub use controller::{TrackerController, Trigger};
