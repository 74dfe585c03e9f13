pub mod invoker;
pub mod keys;
pub mod prompt;
pub mod result;
pub mod transport;

pub use invoker::{Classifier, ClassifierError, ResilientInvoker};
pub use result::{ClassificationResult, ProductClassification};
