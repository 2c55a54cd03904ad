//! Protocol translation between the OpenAI surface and the backend port.

mod inbound;
mod outbound;
mod stream;

pub use inbound::{AggregatedResponse, build_completion, collect_response, finish_reason};
pub use outbound::{ImageHandling, parse_arguments, to_backend_messages, to_backend_request};
pub use stream::{StreamContext, StreamTranslator};
