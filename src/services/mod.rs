//! Built-in handler set: calculator, greeting and blog services.

use std::sync::Arc;

use crate::record_store::RecordStore;
use crate::rpc::{ChannelCapacity, DispatchError, Dispatcher};

pub mod blog;
pub mod calculator;
pub mod greet;

pub use greet::GreetSettings;

/// Dispatcher with every built-in service registered.
pub fn build_dispatcher(
    capacity: ChannelCapacity,
    greet_settings: GreetSettings,
    store: Arc<dyn RecordStore>,
) -> Result<Dispatcher, DispatchError> {
    let mut dispatcher = Dispatcher::new(capacity);
    calculator::register(&mut dispatcher)?;
    greet::register(&mut dispatcher, greet_settings)?;
    blog::register(&mut dispatcher, store)?;
    Ok(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::InMemoryRecordStore;
    use crate::rpc::{CallShape, MethodId};

    #[test]
    fn every_service_is_registered_once() {
        let dispatcher = build_dispatcher(
            ChannelCapacity::Bounded(16),
            GreetSettings::default(),
            Arc::new(InMemoryRecordStore::new()),
        )
        .expect("build dispatcher");

        let methods = dispatcher.methods();
        assert_eq!(methods.len(), 15);
        assert!(methods.contains(&(
            MethodId::new(greet::SERVICE, "GreetEveryone"),
            CallShape::BidiStream
        )));
        assert!(methods.contains(&(
            MethodId::new(blog::SERVICE, "ListBlog"),
            CallShape::ServerStream
        )));
    }
}
