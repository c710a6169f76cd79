mod inference_tests;
mod mpe_tests;
mod utils;
