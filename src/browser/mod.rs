//! What the user is looking at, and the controller that keeps it current.

mod controller;
mod sort;
mod state;

pub use controller::{Browser, BrowserUpdate};
pub use sort::{SortDirection, SortKey, SortSpec};
pub use state::{BrowserState, Row, ViewMode};
