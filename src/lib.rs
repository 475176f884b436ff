// No unsafe here!
#![forbid(unsafe_code)]

#[macro_use]
extern crate lazy_static;
extern crate serde;
#[macro_use]
extern crate serde_prefix;

pub mod error;

// Shared (structs) between binaries
pub mod shared_interface;
pub mod cli;

// Input decoding
pub mod ingest;

// Windowing and feature extraction
pub mod feature_extraction;

// Training, evaluation and thresholding
pub mod detector;
