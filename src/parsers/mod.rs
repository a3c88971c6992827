pub mod html;

pub use html::{ParsedDocument, parse};
