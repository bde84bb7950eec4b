pub mod walk;

pub use walk::{ScanCounters, Scanner};
