pub mod data_layer;
pub mod errors;
pub mod failure;
pub mod options;
