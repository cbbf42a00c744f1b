pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{illumina_object, sample_zone};
