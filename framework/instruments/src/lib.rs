mod build_ops;
mod pid;
mod result;

pub mod prelude {
    pub use crate::build_ops::BuildOperationInstrumentation;
    pub use crate::pid::{PidInstrumentation, PidUnavailableError};
    pub use crate::result::{InvocationResult, Sample};
}
