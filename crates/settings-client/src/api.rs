//! The public operations: register, write, read, and iterate settings.
//!
//! Every operation here follows the same shape: subscribe the handler(s)
//! it depends on, drive one `protocol::perform` exchange, interpret the
//! result. Register operations leave their handlers subscribed for the
//! setting's lifetime (they need to keep reacting to external writes);
//! one-shot `write`/`read`/`read_by_index` calls release their subscription
//! once the exchange completes, via the same ref-counted dispatcher that
//! keeps a register's handlers alive underneath them.

use std::sync::Arc;

use crate::bus::MessageKind;
use crate::codec::{Codec, Value};
use crate::config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol;
use crate::store::{Mode, Notify, Setting};
use crate::wire::{self, Tokens};

/// One entry produced by [`Context::read_by_index`], or the sentinel
/// signaling the daemon's setting table has been fully enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadByIndexOutcome {
    Entry { section: String, name: String, value: Option<String>, type_tag: Option<String> },
    Done,
}

impl Context {
    fn codec_for(&self, type_id: usize) -> Result<Arc<dyn Codec>> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .get(type_id)
            .cloned()
            .ok_or(Error::UnknownCodec(type_id as u32))
    }

    /// Register a setting this process owns and allows the daemon to
    /// write, optionally vetted by `notify` before each update is
    /// committed.
    pub async fn register_owned(
        &self,
        section: &str,
        name: &str,
        value: Value,
        type_id: usize,
        notify: Option<Notify>,
    ) -> Result<()> {
        self.register(section, name, value, type_id, Mode::OwnedRw, notify).await
    }

    /// Register a setting this process owns and the daemon may only read.
    pub async fn register_readonly(&self, section: &str, name: &str, value: Value, type_id: usize) -> Result<()> {
        self.register(section, name, value, type_id, Mode::OwnedRo, None).await
    }

    async fn register(
        &self,
        section: &str,
        name: &str,
        value: Value,
        type_id: usize,
        mode: Mode,
        notify: Option<Notify>,
    ) -> Result<()> {
        let codec = self.codec_for(type_id)?;
        let value_text = codec.to_text(&value).map_err(|err| Error::invalid_argument(err.to_string()))?;
        let type_tag = codec.describe_type(&value);

        let mut setting = Setting::new(section, name, value, type_id, mode);
        if let Some(notify) = notify {
            setting = setting.with_notify(notify);
        }
        self.store.lock().expect("store lock poisoned").insert(setting)?;

        self.dispatcher.subscribe(MessageKind::RegisterResp);
        self.dispatcher.subscribe(MessageKind::Write);

        let tokens = Tokens { section: Some(section), name: Some(name), value: Some(&value_text), type_: Some(&type_tag) };
        let payload = wire::format(&tokens, config::MAX_PAYLOAD_LEN)?;
        let prefix = protocol::name_prefix(section, name);
        let slot = protocol::perform(self, MessageKind::Register, &payload, prefix, self.timeout, self.retries).await;

        if !slot.matched() {
            self.rollback_register(section, name);
            return Err(Error::Timeout { section: section.into(), name: name.into() });
        }
        if let Some(err) = slot.status().into_error(section, name) {
            self.rollback_register(section, name);
            return Err(err);
        }
        Ok(())
    }

    fn rollback_register(&self, section: &str, name: &str) {
        self.store.lock().expect("store lock poisoned").remove(section, name);
        self.dispatcher.unsubscribe(MessageKind::RegisterResp);
        self.dispatcher.unsubscribe(MessageKind::Write);
    }

    /// Register a local mirror of a setting owned elsewhere. Issues a read
    /// to prime the mirror's initial value; if nobody has registered the
    /// setting yet, the read comes back without a value and the watch
    /// stays valid, to be populated by a later write-response broadcast.
    pub async fn register_watch(&self, section: &str, name: &str, value: Value, type_id: usize) -> Result<()> {
        let template = value.clone();
        let setting = Setting::new(section, name, value, type_id, Mode::Watch);
        self.store.lock().expect("store lock poisoned").insert(setting)?;
        self.dispatcher.subscribe(MessageKind::WriteResp);

        match self.read(section, name, type_id, &template).await {
            Ok(_) => {}
            Err(err) if err.is_timeout() => {
                tracing::debug!(section, name, "watch priming read timed out; watch stays valid");
            }
            Err(err) => {
                tracing::debug!(section, name, %err, "watch priming read failed; watch stays valid");
            }
        }
        Ok(())
    }

    /// Request a write to `section`/`name`, wherever it's owned. Follows
    /// the same outbound/reply cycle as an external write, just from this
    /// client's side of the exchange.
    pub async fn write(&self, section: &str, name: &str, type_id: usize, value: &Value) -> Result<()> {
        let codec = self.codec_for(type_id)?;
        let value_text = codec.to_text(value).map_err(|err| Error::invalid_argument(err.to_string()))?;
        let type_tag = codec.describe_type(value);

        self.dispatcher.subscribe(MessageKind::WriteResp);
        let tokens = Tokens { section: Some(section), name: Some(name), value: Some(&value_text), type_: Some(&type_tag) };
        let payload = wire::format(&tokens, config::MAX_PAYLOAD_LEN)?;
        let prefix = protocol::name_prefix(section, name);
        let slot = protocol::perform(self, MessageKind::Write, &payload, prefix, self.timeout, self.retries).await;
        self.dispatcher.unsubscribe(MessageKind::WriteResp);

        if !slot.matched() {
            return Err(Error::Timeout { section: section.into(), name: name.into() });
        }
        match slot.status().into_error(section, name) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Query the current value of `section`/`name`. `template` supplies the
    /// width/variant the response is decoded into (the same role a
    /// caller's existing buffer plays in the original protocol). Returns
    /// `Ok(None)` if the daemon replied with no value token, e.g. because
    /// nobody has registered the setting yet.
    ///
    /// The response's type tag is checked against `type_id`'s own tag
    /// before decoding; a tag prefixed `enum:` is accepted regardless of
    /// what `template` asks for, since an enum's wire tag carries its own
    /// name list rather than matching a fixed string per target type.
    pub async fn read(&self, section: &str, name: &str, type_id: usize, template: &Value) -> Result<Option<Value>> {
        let codec = self.codec_for(type_id)?;

        self.dispatcher.subscribe(MessageKind::ReadResp);
        let tokens = Tokens { section: Some(section), name: Some(name), value: None, type_: None };
        let payload = wire::format(&tokens, config::MAX_PAYLOAD_LEN)?;
        let prefix = protocol::name_prefix(section, name);
        let slot = protocol::perform(self, MessageKind::ReadReq, &payload, prefix, self.timeout, self.retries).await;
        self.dispatcher.unsubscribe(MessageKind::ReadResp);

        if !slot.matched() {
            return Err(Error::Timeout { section: section.into(), name: name.into() });
        }

        let response = slot.response();
        if !response.value_valid {
            return Ok(None);
        }
        if let Some(tag) = response.type_tag.as_deref() {
            let expected = codec.describe_type(template);
            if !tag.starts_with("enum:") && tag != expected {
                return Err(Error::ParseFailed {
                    section: section.to_string(),
                    name: name.to_string(),
                    detail: format!("response type {tag:?} does not match requested type {expected:?}"),
                });
            }
        }
        let text = response.value.as_deref().unwrap_or_default();
        let value = codec.from_text(text, template).map_err(|err| Error::ParseFailed {
            section: section.to_string(),
            name: name.to_string(),
            detail: err.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Enumerate the daemon's setting table one entry at a time by
    /// position. Returns [`ReadByIndexOutcome::Done`] once `index` runs
    /// past the end.
    pub async fn read_by_index(&self, index: u16) -> Result<ReadByIndexOutcome> {
        self.dispatcher.subscribe(MessageKind::ReadByIndexResp);
        self.dispatcher.subscribe(MessageKind::ReadByIndexDone);

        let payload = index.to_le_bytes().to_vec();
        let prefix = index.to_le_bytes().to_vec();
        let slot = protocol::perform(self, MessageKind::ReadByIndexReq, &payload, prefix, self.timeout, self.retries).await;

        self.dispatcher.unsubscribe(MessageKind::ReadByIndexResp);
        self.dispatcher.unsubscribe(MessageKind::ReadByIndexDone);

        if slot.read_by_index_done() {
            return Ok(ReadByIndexOutcome::Done);
        }
        if !slot.matched() {
            return Err(Error::Timeout { section: String::new(), name: format!("index {index}") });
        }

        let response = slot.response();
        Ok(ReadByIndexOutcome::Entry {
            section: response.section.unwrap_or_default(),
            name: response.name.unwrap_or_default(),
            value: response.value,
            type_tag: response.type_tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IntWidth, TYPE_INT};
    use crate::status::{RegisterStatus, WriteStatus};
    use crate::testutil::FakeBus;

    fn daemon_frame(tokens: &Tokens<'_>) -> Vec<u8> {
        wire::format(tokens, config::MAX_PAYLOAD_LEN).unwrap()
    }

    #[tokio::test]
    async fn register_owned_succeeds_on_ok_response() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx2.register_owned("imu", "rate", Value::Int(10, IntWidth::Four), TYPE_INT, None).await
        });

        tokio::task::yield_now().await;
        let mut resp = vec![RegisterStatus::Ok as u8];
        resp.extend(daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: None, type_: None }));
        bus.deliver(MessageKind::RegisterResp, config::DAEMON_SENDER_ID, &resp);

        handle.await.unwrap().unwrap();
        assert_eq!(ctx.store.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_owned_rolls_back_on_timeout() {
        let bus = FakeBus::new();
        let ctx = ctx_with_fast_timeout(bus);

        ctx.register_owned("imu", "rate", Value::Int(10, IntWidth::Four), TYPE_INT, None)
            .await
            .unwrap_err();
        assert!(ctx.store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_reports_daemon_rejection() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx2.write("imu", "rate", TYPE_INT, &Value::Int(99, IntWidth::Four)).await
        });

        tokio::task::yield_now().await;
        let mut resp = vec![WriteStatus::SettingRejected.as_byte()];
        resp.extend(daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: None, type_: None }));
        bus.deliver(MessageKind::WriteResp, config::DAEMON_SENDER_ID, &resp);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SettingRejected { .. }));
    }

    #[tokio::test]
    async fn read_decodes_value_against_template() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx2.read("imu", "rate", TYPE_INT, &Value::Int(0, IntWidth::Four)).await
        });

        tokio::task::yield_now().await;
        let resp = daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("42"), type_: Some("") });
        bus.deliver(MessageKind::ReadResp, config::DAEMON_SENDER_ID, &resp);

        let value = handle.await.unwrap().unwrap();
        assert_eq!(value, Some(Value::Int(42, IntWidth::Four)));
    }

    #[tokio::test]
    async fn read_returns_none_without_value_token() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx2.read("imu", "rate", TYPE_INT, &Value::Int(0, IntWidth::Four)).await
        });

        tokio::task::yield_now().await;
        let resp = daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: None, type_: None });
        bus.deliver(MessageKind::ReadResp, config::DAEMON_SENDER_ID, &resp);

        let value = handle.await.unwrap().unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn read_by_index_done_short_circuits_iteration() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move { ctx2.read_by_index(5).await });

        tokio::task::yield_now().await;
        bus.deliver(MessageKind::ReadByIndexDone, config::DAEMON_SENDER_ID, &[]);

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, ReadByIndexOutcome::Done);
    }

    #[tokio::test]
    async fn read_by_index_returns_entry() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());

        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move { ctx2.read_by_index(0).await });

        tokio::task::yield_now().await;
        let mut resp = 0u16.to_le_bytes().to_vec();
        resp.extend(daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("7"), type_: Some("") }));
        bus.deliver(MessageKind::ReadByIndexResp, config::DAEMON_SENDER_ID, &resp);

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            ReadByIndexOutcome::Entry {
                section: "imu".to_string(),
                name: "rate".to_string(),
                value: Some("7".to_string()),
                type_tag: Some(String::new()),
            }
        );
    }

    fn ctx_with_fast_timeout(bus: Arc<FakeBus>) -> Arc<Context> {
        Context::builder()
            .timeout(std::time::Duration::from_millis(20))
            .retries(0)
            .build(bus)
    }
}
