//! The in-memory collection of registered and watched settings.

use std::sync::Arc;

use crate::codec::{Codec, Value};
use crate::error::Error;
use crate::status::WriteStatus;

/// How a setting's value is governed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Owned by this process; writes from the daemon are accepted and
    /// optionally vetted by a notify callback.
    OwnedRw,
    /// Owned by this process; the daemon may read it but writes are
    /// refused.
    OwnedRo,
    /// A local mirror of a setting owned elsewhere.
    Watch,
}

/// A predicate invoked after a tentative update; returning anything other
/// than `WriteStatus::Ok` reverts the update for owned (non-watch)
/// settings.
pub type Notify = Arc<dyn Fn(&Value) -> WriteStatus + Send + Sync>;

#[derive(Clone)]
pub struct Setting {
    pub section: String,
    pub name: String,
    pub value: Value,
    pub type_id: usize,
    pub mode: Mode,
    pub notify: Option<Notify>,
}

impl std::fmt::Debug for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("section", &self.section)
            .field("name", &self.name)
            .field("value", &self.value)
            .field("type_id", &self.type_id)
            .field("mode", &self.mode)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

impl Setting {
    pub fn new(section: impl Into<String>, name: impl Into<String>, value: Value, type_id: usize, mode: Mode) -> Self {
        Setting { section: section.into(), name: name.into(), value, type_id, mode, notify: None }
    }

    pub fn with_notify(mut self, notify: Notify) -> Self {
        self.notify = Some(notify);
        self
    }

    /// `update_value`: copy-on-attempt with revert on rejection. See
    /// module docs for the exact ordering this follows.
    pub fn update_value(&mut self, codec: &dyn Codec, text: &str) -> WriteStatus {
        self.update_value_inner(codec, text, false)
    }

    /// Apply a value the daemon is reporting as authoritative (e.g. the
    /// default assigned during registration), bypassing the read-only
    /// gate. Used only by the register-response handler for `owned_ro`
    /// settings, which otherwise could never receive their initial value.
    pub fn apply_trusted_value(&mut self, codec: &dyn Codec, text: &str) -> WriteStatus {
        self.update_value_inner(codec, text, true)
    }

    fn update_value_inner(&mut self, codec: &dyn Codec, text: &str, bypass_read_only: bool) -> WriteStatus {
        if self.mode == Mode::OwnedRo && !bypass_read_only {
            return WriteStatus::ReadOnly;
        }

        let shadow = self.value.clone();
        let parsed = match codec.from_text(text, &self.value) {
            Ok(v) => v,
            Err(_) => return WriteStatus::ParseFailed,
        };
        self.value = parsed;

        if let Some(notify) = self.notify.clone() {
            let status = notify(&self.value);
            if self.mode == Mode::Watch {
                return WriteStatus::Ok;
            }
            if !status.is_ok() {
                self.value = shadow;
                return status;
            }
        }
        WriteStatus::Ok
    }
}

/// Ordered collection of settings, grouped by section in insertion order.
#[derive(Debug, Default)]
pub struct Store {
    settings: Vec<Setting>,
}

impl Store {
    pub fn new() -> Self {
        Store { settings: Vec::new() }
    }

    /// Insert a new setting, grouping it after the last existing setting of
    /// the same section (or appending if the section is new).
    pub fn insert(&mut self, setting: Setting) -> Result<(), Error> {
        if self.find(&setting.section, &setting.name).is_some() {
            return Err(Error::DuplicateSetting { section: setting.section, name: setting.name });
        }
        let insert_at = self
            .settings
            .iter()
            .rposition(|s| s.section == setting.section)
            .map(|idx| idx + 1)
            .unwrap_or(self.settings.len());
        self.settings.insert(insert_at, setting);
        Ok(())
    }

    pub fn find(&self, section: &str, name: &str) -> Option<&Setting> {
        self.settings.iter().find(|s| s.section == section && s.name == name)
    }

    pub fn find_mut(&mut self, section: &str, name: &str) -> Option<&mut Setting> {
        self.settings.iter_mut().find(|s| s.section == section && s.name == name)
    }

    pub fn remove(&mut self, section: &str, name: &str) -> Option<Setting> {
        let idx = self.settings.iter().position(|s| s.section == section && s.name == name)?;
        Some(self.settings.remove(idx))
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Setting> {
        self.settings.get(index)
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }
}
