//! Message kind → module routing table.

use std::collections::HashMap;
use std::sync::Arc;

use dsb_transport::Envelope;

use crate::message::MessageKind;
use crate::module::Module;
use crate::RuntimeError;

/// Builds a [`Dispatcher`]. The table is frozen by [`build`](Self::build).
#[derive(Default)]
pub struct DispatcherBuilder {
    routes: HashMap<MessageKind, Arc<dyn Module>>,
    modules: Vec<Arc<dyn Module>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `kind` to `module`. A later registration for the same kind
    /// replaces the earlier one.
    pub fn register(mut self, kind: MessageKind, module: Arc<dyn Module>) -> Self {
        let module = self.add(module);
        if let Some(previous) = self.routes.insert(kind, module) {
            tracing::warn!(%kind, module = previous.name(), "message type re-registered");
        }
        self
    }

    /// Add a module that receives nothing but still runs and reports data.
    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.add(module);
        self
    }

    fn add(&mut self, module: Arc<dyn Module>) -> Arc<dyn Module> {
        if !self.modules.iter().any(|m| Arc::ptr_eq(m, &module)) {
            self.modules.push(module.clone());
        }
        module
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            routes: self.routes,
            modules: self.modules,
        }
    }
}

/// Immutable routing table from message kind to module.
pub struct Dispatcher {
    routes: HashMap<MessageKind, Arc<dyn Module>>,
    modules: Vec<Arc<dyn Module>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Hand `envelope` to the module registered for its kind.
    ///
    /// Returns the receiving module's name. Unknown and unregistered kinds
    /// come back as errors; the table is never touched.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<&'static str, RuntimeError> {
        let kind = MessageKind::of(envelope)?;
        let module = self
            .routes
            .get(&kind)
            .ok_or(RuntimeError::UnregisteredMessageType(kind))?;
        module.receive(envelope);
        Ok(module.name())
    }

    /// Registered kinds, sorted.
    pub fn registered_kinds(&self) -> Vec<MessageKind> {
        let mut kinds: Vec<_> = self.routes.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Every module, in registration order.
    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    /// Each module's snapshot, keyed by module name.
    pub fn snapshots(&self) -> serde_json::Map<String, serde_json::Value> {
        self.modules
            .iter()
            .map(|m| (m.name().to_string(), m.snapshot()))
            .collect()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes: Vec<_> = self
            .registered_kinds()
            .into_iter()
            .map(|k| (k, self.routes[&k].name()))
            .collect();
        f.debug_struct("Dispatcher").field("routes", &routes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use dsb_transport::NodeId;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Envelope>>,
    }

    #[async_trait::async_trait]
    impl Module for Recorder {
        fn name(&self) -> &'static str {
            "RECORDER"
        }

        fn receive(&self, envelope: &Envelope) {
            self.seen.lock().unwrap().push(envelope.clone());
        }

        fn snapshot(&self) -> serde_json::Value {
            serde_json::json!({ "seen": self.seen.lock().unwrap().len() })
        }

        async fn run(&self, _resolver: crate::Resolver) {}
    }

    #[test]
    fn routes_registered_kind() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::builder()
            .register(MessageKind::HelloWorld, recorder.clone())
            .build();

        let env = MessageKind::HelloWorld.envelope(NodeId::new(1), serde_json::json!({}));
        assert_eq!(dispatcher.dispatch(&env).unwrap(), "RECORDER");
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unregistered_kind_is_rejected_and_table_unchanged() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::builder()
            .register(MessageKind::HelloWorld, recorder.clone())
            .build();
        let before = dispatcher.registered_kinds();

        let env = MessageKind::Heartbeat.envelope(NodeId::new(1), serde_json::json!({}));
        let err = dispatcher.dispatch(&env).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::UnregisteredMessageType(MessageKind::Heartbeat)
        ));

        let unknown = Envelope::new(999, NodeId::new(1), serde_json::Value::Null);
        let err = dispatcher.dispatch(&unknown).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownMessageType(999)));

        assert_eq!(dispatcher.registered_kinds(), before);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn module_listed_once_and_snapshotted_by_name() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::builder()
            .register(MessageKind::HelloWorld, recorder.clone())
            .register(MessageKind::Heartbeat, recorder.clone())
            .module(recorder)
            .build();

        assert_eq!(dispatcher.modules().len(), 1);
        assert_eq!(
            dispatcher.registered_kinds(),
            vec![MessageKind::HelloWorld, MessageKind::Heartbeat]
        );
        let snapshots = dispatcher.snapshots();
        assert_eq!(snapshots["RECORDER"]["seen"], 0);
    }
}
