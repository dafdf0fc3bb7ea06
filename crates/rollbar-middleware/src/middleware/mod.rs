//! Error-reporting middleware.

pub mod report;

pub use report::{ReportingLayer, ReportingService};
