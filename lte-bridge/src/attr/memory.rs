use super::{AttrError, AttrId, AttrType, AttrValue, AttributeStore, WriteMode};
use crate::settings::Settings;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tracing::debug;

/// Attribute store kept in process memory.
///
/// Values are typed by [`AttrId::attr_type`] and strings are bounded by
/// `max_string_len`. Broadcasting writes that change a non-quiet attribute are
/// forwarded to the subscriber as one-element batches.
pub struct MemoryAttrStore {
    max_string_len: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<AttrId, Slot>,
    listener: Option<flume::Sender<Vec<AttrId>>>,
}

#[derive(Default)]
struct Slot {
    value: Option<AttrValue>,
    quiet: bool,
}

impl MemoryAttrStore {
    pub fn new(max_string_len: usize) -> Self {
        Self {
            max_string_len,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Store bounded by [`Settings::max_string_len`].
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_string_len)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(&self, id: AttrId, value: &AttrValue) -> Result<(), AttrError> {
        let expected = id.attr_type();
        let actual = value.attr_type();
        if expected != actual {
            return Err(AttrError::TypeMismatch {
                id,
                expected,
                actual,
            });
        }

        if let AttrValue::Str(s) = value
            && s.len() > self.max_string_len
        {
            return Err(AttrError::TooLong {
                id,
                len: s.len(),
                max: self.max_string_len,
            });
        }

        Ok(())
    }
}

impl Inner {
    /// Stores `value`, returning whether the change should be broadcast.
    fn store(&mut self, id: AttrId, value: AttrValue, mode: WriteMode) -> bool {
        let slot = self.slots.entry(id).or_default();
        if slot.value.as_ref() == Some(&value) {
            return false;
        }

        if !slot.quiet {
            debug!("{id} = {value}");
        }

        slot.value = Some(value);

        mode == WriteMode::Broadcast && !slot.quiet
    }

    fn notify(&self, id: AttrId) {
        let Some(tx) = &self.listener else {
            return;
        };

        if tx.send(vec![id]).is_err() {
            debug!("attribute listener is gone, dropping change of {id}");
        }
    }
}

impl AttributeStore for MemoryAttrStore {
    fn get(&self, id: AttrId) -> Option<AttrValue> {
        self.read().slots.get(&id).and_then(|slot| slot.value.clone())
    }

    fn set(&self, id: AttrId, value: AttrValue, mode: WriteMode) -> Result<(), AttrError> {
        self.validate(id, &value)?;

        let mut inner = self.write();
        if inner.store(id, value, mode) {
            inner.notify(id);
        }

        Ok(())
    }

    fn add_u32(&self, id: AttrId, delta: u32) -> Result<(), AttrError> {
        if id.attr_type() != AttrType::U32 {
            return Err(AttrError::TypeMismatch {
                id,
                expected: id.attr_type(),
                actual: AttrType::U32,
            });
        }

        let mut inner = self.write();
        let current = match inner.slots.get(&id).and_then(|s| s.value.as_ref()) {
            Some(AttrValue::U32(v)) => *v,
            _ => 0,
        };

        let value = AttrValue::U32(current.wrapping_add(delta));
        if inner.store(id, value, WriteMode::Broadcast) {
            inner.notify(id);
        }

        Ok(())
    }

    fn set_quiet(&self, id: AttrId, quiet: bool) -> Result<(), AttrError> {
        self.write().slots.entry(id).or_default().quiet = quiet;

        Ok(())
    }

    fn subscribe(&self) -> flume::Receiver<Vec<AttrId>> {
        let (tx, rx) = flume::unbounded();
        self.write().listener = Some(tx);

        rx
    }
}
