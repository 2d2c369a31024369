pub mod backend_coordinator;

pub use backend_coordinator::{
    BackendCoordinatorActor, BackendCoordinatorArguments, BackendHandle, CoordinatorError,
    CoordinatorMsg,
};
