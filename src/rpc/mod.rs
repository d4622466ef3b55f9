//! Streaming call engine
//!
//! Message channels, call contexts, the four call shapes and the dispatcher
//! that routes calls to registered handlers.

pub mod call;
pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod handler;

pub use call::{BidiStreamCall, ClientStreamCall, RequestSink, ResponseStream, UnaryCall};
pub use channel::{channel, ChannelCapacity, ChannelError, MessageReceiver, MessageSender};
pub use context::{CallContext, ContextError};
pub use dispatcher::{Call, CallShape, DispatchError, Dispatcher, IncomingCall, MethodId};
pub use handler::{decode, encode, Handler};
