pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{Attributes, EntityId, Row, attributes};
pub use value::Value;
