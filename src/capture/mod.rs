mod coordinator;
#[cfg(test)]
mod tests;

pub use coordinator::{preprocess, CaptureCoordinator};
