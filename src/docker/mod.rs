//! Everything that speaks to the Docker daemon and the attached worker
//! stream: the frame codec, the line reader / worker channel, and the gateway.

pub mod codec;
pub mod gateway;
pub mod stream;

pub use gateway::{ContainerHandle, DockerGateway};
pub use stream::AttachedStream;
