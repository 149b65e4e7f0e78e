use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatch::Dispatcher;

#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub health: Arc<ServeHealth>,
    pub upload_max_bytes: usize,
}

impl GatewayState {
    pub fn new(dispatcher: Arc<Dispatcher>, upload_max_bytes: usize) -> Self {
        Self {
            dispatcher,
            health: Arc::new(ServeHealth::default()),
            upload_max_bytes,
        }
    }
}

#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        let mut guard = self.last_error.lock().expect("health lock poisoned");
        *guard = None;
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        let mut guard = self.last_error.lock().expect("health lock poisoned");
        *guard = Some(error.into());
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("health lock poisoned").clone()
    }
}
