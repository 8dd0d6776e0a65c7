pub mod kelly;
pub mod limits;
pub mod metrics;
pub mod scoring;
