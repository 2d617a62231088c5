//! The six wire exchanges: outbound `perform` and the inbound handlers
//! that drive the setting store and signal pending requests.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::bus::{Callback, MessageKind};
use crate::config;
use crate::context::Context;
use crate::request::{RequestSlot, ResponseFields};
use crate::status::{RegisterStatus, WriteStatus};
use crate::store::Mode;
use crate::wire::{self, Tokens};

/// Outbound request/reply: send up to `retries + 1` times, waiting
/// `timeout` after each attempt, until a matching response signals the
/// descriptor or the budget is exhausted.
///
/// Both scheduling modes in the original design (single shared wait vs.
/// one event per caller) collapse onto this single path: every call gets
/// its own `RequestSlot`, so "single-threaded" callers are simply callers
/// who never keep more than one slot alive at once.
pub async fn perform(
    ctx: &Context,
    kind: MessageKind,
    payload: &[u8],
    compare_prefix: Vec<u8>,
    timeout: Duration,
    retries: u32,
) -> Arc<RequestSlot> {
    let slot = Arc::new(RequestSlot::new(kind, compare_prefix));
    ctx.requests.append(slot.clone());

    let mut matched = false;
    for attempt in 0..=retries {
        tracing::trace!(attempt, ?kind, "sending request");
        if let Err(err) = ctx.bus.send_from(kind, payload, ctx.sender_id) {
            tracing::warn!(%err, ?kind, "bus send failed");
        }
        if slot.wait(timeout).await {
            matched = true;
            break;
        }
    }
    ctx.requests.remove(&slot);
    if !matched {
        tracing::warn!(?kind, "request exhausted retry budget");
    }
    slot
}

pub(crate) fn name_prefix(section: &str, name: &str) -> Vec<u8> {
    let tokens = Tokens { section: Some(section), name: Some(name), value: None, type_: None };
    wire::format(&tokens, config::MAX_PAYLOAD_LEN).unwrap_or_default()
}

/// Send a write-response frame. `value`/`type_tag` carry the setting's
/// current value so a write-response broadcast can also serve as the
/// watch-propagation message (see `handle_write_response`); callers with
/// no setting to report against (unknown setting, no codec) pass `None`.
fn send_write_response(ctx: &Context, section: &str, name: &str, status: WriteStatus, value: Option<&str>, type_tag: Option<&str>) {
    let tokens = Tokens { section: Some(section), name: Some(name), value, type_: type_tag };
    let mut payload = vec![status.as_byte()];
    match wire::format(&tokens, config::MAX_PAYLOAD_LEN) {
        Ok(body) => payload.extend_from_slice(&body),
        Err(err) => tracing::warn!(%err, "failed to format write-response identity"),
    }
    if let Err(err) = ctx.bus.send_from(MessageKind::WriteResp, &payload, ctx.sender_id) {
        tracing::warn!(%err, "failed to send write-response");
    }
}

/// Drive `update_value` on a local watch for `(section, name)`, if one
/// exists, with a freshly observed value (from a read-response or a
/// write-response broadcast).
fn propagate_to_watch(ctx: &Context, section: &str, name: &str, value: Option<&str>) {
    let Some(value) = value else { return };
    let mut store = ctx.store.lock().expect("store lock poisoned");
    let Some(watch) = store.find_mut(section, name) else { return };
    if watch.mode != Mode::Watch {
        return;
    }
    let codec = {
        let registry = ctx.registry.lock().expect("registry lock poisoned");
        match registry.get(watch.type_id) {
            Some(codec) => codec.clone(),
            None => return,
        }
    };
    let status = watch.update_value(codec.as_ref(), value);
    if !status.is_ok() {
        tracing::warn!(section, name, ?status, "watch failed to apply broadcast value");
    }
}

/// register-response: locate the pending register, trust the daemon's
/// returned value for readonly settings, signal.
fn handle_register_response(ctx: &Context, sender_id: u16, payload: &[u8]) {
    if sender_id != config::DAEMON_SENDER_ID {
        return;
    }
    if payload.is_empty() {
        return;
    }
    let Some(status) = RegisterStatus::from_byte(payload[0]) else {
        tracing::warn!("register-response carried an unknown status byte");
        return;
    };
    if status.is_parse_failed() {
        tracing::debug!("register response reported a parse failure; next retry will resend");
        return;
    }

    let rest = &payload[1..];
    let (_, tokens) = wire::parse(rest);
    let (Some(section), Some(name)) = (tokens.section, tokens.name) else { return };

    let Some(slot) = ctx.requests.check(MessageKind::Register, &name_prefix(section, name)) else {
        return;
    };

    if let Some(value) = tokens.value {
        let mut store = ctx.store.lock().expect("store lock poisoned");
        if let Some(setting) = store.find_mut(section, name) {
            if setting.mode == Mode::OwnedRo {
                let codec = {
                    let registry = ctx.registry.lock().expect("registry lock poisoned");
                    registry.get(setting.type_id).cloned()
                };
                if let Some(codec) = codec {
                    let result = setting.apply_trusted_value(codec.as_ref(), value);
                    if !result.is_ok() {
                        tracing::warn!(section, name, ?result, "failed to apply daemon's registered value");
                    }
                }
            }
        }
    }

    slot.set_status(WriteStatus::Ok);
    if let Err(err) = ctx.requests.signal(&slot, MessageKind::Register) {
        tracing::warn!(%err, "register-response signal mismatch");
    }
}

/// write: an external write addressed to a setting we own.
fn handle_write(ctx: &Context, sender_id: u16, payload: &[u8]) {
    if sender_id != config::DAEMON_SENDER_ID {
        return;
    }
    if payload.len() > config::MAX_PAYLOAD_LEN {
        let (_, tokens) = wire::parse(payload);
        if let (Some(section), Some(name)) = (tokens.section, tokens.name) {
            send_write_response(ctx, section, name, WriteStatus::ValueRejected, None, None);
        }
        return;
    }
    let (_, tokens) = wire::parse(payload);
    let (Some(section), Some(name), Some(value)) = (tokens.section, tokens.name, tokens.value) else {
        tracing::debug!("write frame missing required tokens");
        return;
    };

    let mut store = ctx.store.lock().expect("store lock poisoned");
    let Some(setting) = store.find_mut(section, name) else {
        drop(store);
        send_write_response(ctx, section, name, WriteStatus::SettingRejected, None, None);
        return;
    };
    if setting.mode == Mode::Watch {
        // watches react only to write-response broadcasts, not direct writes
        return;
    }
    let codec = {
        let registry = ctx.registry.lock().expect("registry lock poisoned");
        registry.get(setting.type_id).cloned()
    };
    let Some(codec) = codec else {
        drop(store);
        send_write_response(ctx, section, name, WriteStatus::ServiceFailed, None, None);
        return;
    };
    let status = setting.update_value(codec.as_ref(), value);
    let (section, name) = (setting.section.clone(), setting.name.clone());
    let value_text = codec.to_text(&setting.value).ok();
    let type_tag = codec.describe_type(&setting.value);
    drop(store);
    send_write_response(ctx, &section, &name, status, value_text.as_deref(), Some(&type_tag));
}

/// write-response: propagate to watches on OK, then signal the pending
/// write (matched on setting identity, independent of the status byte).
fn handle_write_response(ctx: &Context, sender_id: u16, payload: &[u8]) {
    if sender_id != config::DAEMON_SENDER_ID {
        return;
    }
    if payload.is_empty() {
        return;
    }
    let Some(status) = WriteStatus::from_byte(payload[0]) else {
        tracing::warn!("write-response carried an unknown status byte");
        return;
    };
    let (_, tokens) = wire::parse(&payload[1..]);
    let (Some(section), Some(name)) = (tokens.section, tokens.name) else { return };

    if status.is_ok() {
        propagate_to_watch(ctx, section, name, tokens.value);
    }

    if let Some(slot) = ctx.requests.check(MessageKind::Write, &name_prefix(section, name)) {
        slot.set_status(status);
        if let Err(err) = ctx.requests.signal(&slot, MessageKind::Write) {
            tracing::warn!(%err, "write-response signal mismatch");
        }
    }
}

/// read-response: capture value/type into the pending read, signal, and
/// (if a local watch exists) apply the same value there.
fn handle_read_response(ctx: &Context, sender_id: u16, payload: &[u8]) {
    if sender_id != config::DAEMON_SENDER_ID {
        return;
    }
    let (_, tokens) = wire::parse(payload);
    let (Some(section), Some(name)) = (tokens.section, tokens.name) else { return };

    if let Some(slot) = ctx.requests.check(MessageKind::ReadReq, &name_prefix(section, name)) {
        slot.set_response(ResponseFields {
            section: Some(section.to_string()),
            name: Some(name.to_string()),
            value: tokens.value.map(str::to_string),
            type_tag: tokens.type_.map(str::to_string),
            value_valid: tokens.value.is_some(),
            index: None,
        });
        if let Err(err) = ctx.requests.signal(&slot, MessageKind::ReadReq) {
            tracing::warn!(%err, "read-response signal mismatch");
        }
    }

    propagate_to_watch(ctx, section, name, tokens.value);
}

/// read-by-index-response: capture the indexed entry into the pending
/// iterator request and signal it.
fn handle_read_by_index_response(ctx: &Context, sender_id: u16, payload: &[u8]) {
    if sender_id != config::DAEMON_SENDER_ID {
        return;
    }
    if payload.len() < 2 {
        return;
    }
    let index = u16::from_le_bytes([payload[0], payload[1]]);
    let (_, tokens) = wire::parse(&payload[2..]);

    let Some(slot) = ctx.requests.check(MessageKind::ReadByIndexReq, &index.to_le_bytes()) else {
        return;
    };
    slot.set_response(ResponseFields {
        section: tokens.section.map(str::to_string),
        name: tokens.name.map(str::to_string),
        value: tokens.value.map(str::to_string),
        type_tag: tokens.type_.map(str::to_string),
        value_valid: tokens.value.is_some(),
        index: Some(index),
    });
    if let Err(err) = ctx.requests.signal(&slot, MessageKind::ReadByIndexReq) {
        tracing::warn!(%err, "read-by-index-response signal mismatch");
    }
}

/// read-by-index-done: release every outstanding iterator; one broadcast
/// may unblock several concurrent callers.
fn handle_read_by_index_done(ctx: &Context, sender_id: u16, _payload: &[u8]) {
    if sender_id != config::DAEMON_SENDER_ID {
        return;
    }
    ctx.requests.signal_all_read_by_index();
}

fn make_callback(ctx: Weak<Context>, handler: fn(&Context, u16, &[u8])) -> Callback {
    Arc::new(move |sender_id, payload| {
        if let Some(ctx) = ctx.upgrade() {
            handler(&ctx, sender_id, payload);
        }
    })
}

/// Build the fixed kind -> handler map installed on every `Context`. Takes
/// a `Weak` reference since the map is constructed before the owning
/// `Arc<Context>` exists (see `Context::new`, which uses `Arc::new_cyclic`).
pub(crate) fn build_handlers(ctx: Weak<Context>) -> HashMap<MessageKind, Callback> {
    let mut handlers: HashMap<MessageKind, Callback> = HashMap::new();
    handlers.insert(MessageKind::RegisterResp, make_callback(ctx.clone(), handle_register_response));
    handlers.insert(MessageKind::Write, make_callback(ctx.clone(), handle_write));
    handlers.insert(MessageKind::WriteResp, make_callback(ctx.clone(), handle_write_response));
    handlers.insert(MessageKind::ReadResp, make_callback(ctx.clone(), handle_read_response));
    handlers.insert(MessageKind::ReadByIndexResp, make_callback(ctx.clone(), handle_read_by_index_response));
    handlers.insert(MessageKind::ReadByIndexDone, make_callback(ctx, handle_read_by_index_done));
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IntWidth, Value, TYPE_INT};
    use crate::context::Context;
    use crate::store::Setting;
    use crate::testutil::FakeBus;

    fn daemon_frame(tokens: &Tokens<'_>) -> Vec<u8> {
        wire::format(tokens, config::MAX_PAYLOAD_LEN).unwrap()
    }

    #[tokio::test]
    async fn register_response_applies_readonly_value_and_signals() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(0, IntWidth::Four), TYPE_INT, Mode::OwnedRo)).unwrap();
        ctx.dispatcher.subscribe(MessageKind::RegisterResp);

        let payload = name_prefix("imu", "rate");
        let perform_task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                perform(&ctx, MessageKind::Register, &payload, name_prefix("imu", "rate"), Duration::from_millis(200), 0).await
            })
        };

        tokio::task::yield_now().await;
        let mut resp = vec![RegisterStatus::Ok as u8];
        resp.extend(daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("100"), type_: Some("int") }));
        bus.deliver(MessageKind::RegisterResp, config::DAEMON_SENDER_ID, &resp);

        let slot = perform_task.await.unwrap();
        assert!(slot.status().is_ok());
        let value = ctx.store.lock().unwrap().find("imu", "rate").unwrap().value.clone();
        assert_eq!(value, Value::Int(100, IntWidth::Four));
    }

    #[tokio::test]
    async fn write_to_owned_setting_sends_response() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(10, IntWidth::Four), TYPE_INT, Mode::OwnedRw)).unwrap();
        ctx.dispatcher.subscribe(MessageKind::Write);

        let payload = daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("55"), type_: Some("int") });
        bus.deliver(MessageKind::Write, config::DAEMON_SENDER_ID, &payload);

        let value = ctx.store.lock().unwrap().find("imu", "rate").unwrap().value.clone();
        assert_eq!(value, Value::Int(55, IntWidth::Four));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, MessageKind::WriteResp);
        assert_eq!(sent[0].1[0], WriteStatus::Ok.as_byte());
        let (_, tokens) = wire::parse(&sent[0].1[1..]);
        assert_eq!(tokens.value, Some("55"));
    }

    // The write-response broadcast carries the setting's current value, not
    // just its identity, since watches react only to this broadcast (not to
    // the inbound write itself) and would otherwise never see the update.
    #[tokio::test]
    async fn write_response_broadcast_carries_value_for_watch_propagation() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(10, IntWidth::Four), TYPE_INT, Mode::OwnedRw)).unwrap();
        ctx.dispatcher.subscribe(MessageKind::Write);

        let payload = daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("55"), type_: Some("int") });
        bus.deliver(MessageKind::Write, config::DAEMON_SENDER_ID, &payload);

        let sent = bus.drain_sent();
        let (outcome, tokens) = wire::parse(&sent[0].1[1..]);
        assert_eq!(outcome, wire::ParseOutcome::Type);
        assert_eq!(tokens.section, Some("imu"));
        assert_eq!(tokens.name, Some("rate"));
        assert_eq!(tokens.value, Some("55"));
    }

    #[tokio::test]
    async fn write_ignored_for_frames_from_non_daemon_sender() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(10, IntWidth::Four), TYPE_INT, Mode::OwnedRw)).unwrap();
        ctx.dispatcher.subscribe(MessageKind::Write);

        let payload = daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("55"), type_: Some("int") });
        bus.deliver(MessageKind::Write, 0xFF, &payload);

        let value = ctx.store.lock().unwrap().find("imu", "rate").unwrap().value.clone();
        assert_eq!(value, Value::Int(10, IntWidth::Four));
        assert!(bus.drain_sent().is_empty());
    }

    #[tokio::test]
    async fn write_response_propagates_to_watch() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(0, IntWidth::Four), TYPE_INT, Mode::Watch)).unwrap();
        ctx.dispatcher.subscribe(MessageKind::WriteResp);

        let mut resp = vec![WriteStatus::Ok.as_byte()];
        resp.extend(daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("77"), type_: Some("int") }));
        bus.deliver(MessageKind::WriteResp, config::DAEMON_SENDER_ID, &resp);

        let value = ctx.store.lock().unwrap().find("imu", "rate").unwrap().value.clone();
        assert_eq!(value, Value::Int(77, IntWidth::Four));
    }

    // End-to-end: an owning client's write-response to an external write is
    // the only frame a watcher on another client ever sees (the original
    // write is never broadcast), so that response must itself carry the new
    // value for watch coherence to hold.
    #[tokio::test]
    async fn owner_write_response_round_trips_into_another_clients_watch() {
        let owner_bus = FakeBus::new();
        let owner = Context::new(owner_bus.clone());
        owner.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(10, IntWidth::Four), TYPE_INT, Mode::OwnedRw)).unwrap();
        owner.dispatcher.subscribe(MessageKind::Write);

        let external_write = daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("55"), type_: Some("int") });
        owner_bus.deliver(MessageKind::Write, config::DAEMON_SENDER_ID, &external_write);

        let sent = owner_bus.drain_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, MessageKind::WriteResp);
        let daemon_rebroadcast = &sent[0].1;

        let watcher_bus = FakeBus::new();
        let watcher = Context::new(watcher_bus);
        watcher.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(0, IntWidth::Four), TYPE_INT, Mode::Watch)).unwrap();
        watcher.dispatcher.subscribe(MessageKind::WriteResp);

        handle_write_response(&watcher, config::DAEMON_SENDER_ID, daemon_rebroadcast);

        let value = watcher.store.lock().unwrap().find("imu", "rate").unwrap().value.clone();
        assert_eq!(value, Value::Int(55, IntWidth::Four));
    }

    #[tokio::test]
    async fn write_response_rejection_leaves_watch_unchanged() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.store.lock().unwrap().insert(Setting::new("imu", "rate", Value::Int(0, IntWidth::Four), TYPE_INT, Mode::Watch)).unwrap();
        ctx.dispatcher.subscribe(MessageKind::WriteResp);

        let mut resp = vec![WriteStatus::ValueRejected.as_byte()];
        resp.extend(daemon_frame(&Tokens { section: Some("imu"), name: Some("rate"), value: Some("77"), type_: Some("int") }));
        bus.deliver(MessageKind::WriteResp, config::DAEMON_SENDER_ID, &resp);

        let value = ctx.store.lock().unwrap().find("imu", "rate").unwrap().value.clone();
        assert_eq!(value, Value::Int(0, IntWidth::Four));
    }

    #[tokio::test]
    async fn read_by_index_done_releases_pending_iterators() {
        let bus = FakeBus::new();
        let ctx = Context::new(bus.clone());
        ctx.dispatcher.subscribe(MessageKind::ReadByIndexDone);

        let slot = Arc::new(RequestSlot::new(MessageKind::ReadByIndexReq, 0u16.to_le_bytes().to_vec()));
        ctx.requests.append(slot.clone());

        bus.deliver(MessageKind::ReadByIndexDone, config::DAEMON_SENDER_ID, &[]);

        assert!(slot.read_by_index_done());
    }
}
