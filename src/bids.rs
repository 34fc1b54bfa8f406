//! BIDS directory traversal and completion tracking

/// A single schedulable item (session, subject or the whole dataset)
pub mod unit;
/// Find work units in the dataset root
pub mod enumerate;
/// Compare expected against existing reports
pub mod completion;
