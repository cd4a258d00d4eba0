pub mod cloud_event;
pub mod directive;
pub mod report;

pub use cloud_event::*;
pub use directive::*;
pub use report::*;
pub use test::*;
