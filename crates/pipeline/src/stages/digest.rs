use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::StageFailure;
use crate::traits::Transform;

/// Where a [`Sha256Tap`] publishes its digest once flushed.
#[derive(Debug, Clone, Default)]
pub struct DigestHandle {
    digest: Rc<RefCell<Option<String>>>,
}

impl DigestHandle {
    /// Lowercase hex digest, available after the tap has been flushed.
    pub fn get(&self) -> Option<String> {
        self.digest.borrow().clone()
    }
}

/// Pass-through transform that hashes every byte it forwards.
pub struct Sha256Tap {
    name: String,
    hasher: Option<Sha256>,
    handle: DigestHandle,
}

impl Sha256Tap {
    pub fn new(name: impl Into<String>) -> (Self, DigestHandle) {
        let handle = DigestHandle::default();
        let tap = Self {
            name: name.into(),
            hasher: Some(Sha256::new()),
            handle: handle.clone(),
        };
        (tap, handle)
    }
}

impl Transform for Sha256Tap {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, StageFailure> {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&chunk);
        }
        Ok(chunk)
    }

    fn flush(&mut self) -> Result<Bytes, StageFailure> {
        if let Some(hasher) = self.hasher.take() {
            *self.handle.digest.borrow_mut() = Some(hex::encode(hasher.finalize()));
        }
        Ok(Bytes::new())
    }
}
