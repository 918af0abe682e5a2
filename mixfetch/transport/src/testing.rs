use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    address::CanonicalAddress,
    error::MixnetError,
    mixnet::{MixnetService, RequestId},
};

/// [`MixnetService`] that records outbound traffic instead of delivering it.
#[derive(Default)]
pub(crate) struct RecordingMixnet {
    next_id: AtomicU64,
    sent: Mutex<HashMap<RequestId, Vec<Bytes>>>,
    closed: Mutex<Vec<RequestId>>,
    send_failure: Mutex<Option<String>>,
}

impl RecordingMixnet {
    pub(crate) fn sent(&self, id: RequestId) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn closed(&self) -> Vec<RequestId> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn fail_sends(&self, message: &str) {
        self.send_failure.lock().unwrap().replace(message.into());
    }
}

#[async_trait]
impl MixnetService for RecordingMixnet {
    async fn open_connection(&self, _: &CanonicalAddress) -> Result<RequestId, MixnetError> {
        Ok(RequestId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    async fn send_bytes(&self, id: RequestId, bytes: Bytes) -> Result<(), MixnetError> {
        if let Some(message) = self.send_failure.lock().unwrap().clone() {
            return Err(MixnetError(message));
        }

        self.sent.lock().unwrap().entry(id).or_default().push(bytes);
        Ok(())
    }

    async fn close_connection(&self, id: RequestId) -> Result<(), MixnetError> {
        self.closed.lock().unwrap().push(id);
        Ok(())
    }
}
