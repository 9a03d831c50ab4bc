mod chain_tests;
mod details_tests;
