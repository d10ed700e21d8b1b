pub mod api;
pub mod cfg;
pub mod error;
pub mod experiment;
pub mod logs;
pub mod serde_util;
pub mod sse;
pub mod types;

#[cfg(test)]
mod test_util;
