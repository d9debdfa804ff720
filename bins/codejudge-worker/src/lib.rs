pub mod consumer;
pub mod engine;
pub mod evaluator;
pub mod gateway;
pub mod grading;
pub mod intake;
pub mod sandbox;

pub use engine::{DummyEngine, SandboxEngine};
pub use gateway::{ContainerRuntime, RuntimeGateway};
pub use grading::{Grader, GradingError};
pub use intake::SubmissionIntake;
pub use sandbox::{DockerSandbox, SandboxError, SandboxInstance, SandboxRunResult};
