pub mod status;

pub use status::{classify, Category, Classification, Status};
