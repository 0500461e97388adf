pub mod date_handling;
pub mod http;
pub mod interpolation;
pub mod path_processing;
pub mod text_processing;

pub use date_handling::*;
pub use http::*;
pub use interpolation::*;
pub use path_processing::*;
pub use text_processing::*;
