pub mod clock;
pub mod context;
pub mod dispatch;
pub mod health;
pub mod inspect;
pub mod locks;
pub mod report;
pub mod strategies;

pub use context::Context;
pub use dispatch::{ActionRequest, Command, Dispatcher, Response};
pub use report::{OperationReport, Outcome};
pub use strategies::ControllerError;
