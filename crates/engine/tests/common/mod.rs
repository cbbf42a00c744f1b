pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{
    MD5_A, MD5_B, MD5_DATA, complete_object, engine, illumina_product, test_config,
};
