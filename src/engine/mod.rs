mod conflict;
mod error;
mod queries;
mod status;
mod waitlist;

pub use conflict::now_ms;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::external::{AlternativeSearch, AuditSink, LogSink, UnrankedSearch, audit_record};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) search: Arc<dyn AlternativeSearch>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub config: EngineConfig,
    /// Reverse lookup: order id → room id.
    pub(super) order_to_room: DashMap<OrderId, Ulid>,
    /// Reverse lookup: waitlist entry id → room id.
    pub(super) entry_to_room: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a RoomState (no locking — caller holds the lock).
fn apply_to_room(
    rs: &mut RoomState,
    event: &Event,
    order_idx: &DashMap<OrderId, Ulid>,
    entry_idx: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::RoomStatusChanged {
            from,
            to,
            reason,
            operator,
            version,
            at,
            ..
        } => {
            rs.status = *to;
            rs.version = *version;
            rs.last_changed_at = *at;
            rs.last_changed_by = Some(*operator);
            rs.log.push(TransitionLogEntry {
                from: *from,
                to: *to,
                reason: reason.clone(),
                operator: *operator,
                occurred_at: *at,
                version: *version,
            });
        }
        Event::ReservationPlaced {
            room_id,
            order_id,
            requester,
            span,
            at,
        } => {
            rs.insert_reservation(Reservation {
                order_id: *order_id,
                requester: *requester,
                span: *span,
                created_at: *at,
            });
            order_idx.insert(*order_id, *room_id);
        }
        Event::ReservationCancelled { order_id, .. } => {
            rs.remove_reservation(*order_id);
            order_idx.remove(order_id);
        }
        Event::WaitlistEnrolled {
            entry_id,
            room_id,
            requester,
            span,
            guests,
            priority,
            seq,
            note,
            at,
        } => {
            rs.waitlist.push(WaitlistEntry {
                id: *entry_id,
                requester: *requester,
                span: *span,
                guests: *guests,
                priority: *priority,
                seq: *seq,
                status: WaitlistStatus::Waiting,
                note: note.clone(),
                created_at: *at,
                notified_at: None,
                expires_at: None,
                order_id: None,
            });
            rs.enroll_seq = rs.enroll_seq.max(seq + 1);
            entry_idx.insert(*entry_id, *room_id);
        }
        Event::WaitlistNotified {
            entry_id,
            notified_at,
            expires_at,
            ..
        } => {
            if let Some(entry) = rs.waitlist_entry_mut(entry_id) {
                entry.status = WaitlistStatus::Notified;
                entry.notified_at = Some(*notified_at);
                entry.expires_at = Some(*expires_at);
            }
        }
        Event::WaitlistConfirmed {
            entry_id, order_id, ..
        } => {
            if let Some(entry) = rs.waitlist_entry_mut(entry_id) {
                entry.status = WaitlistStatus::Confirmed;
                entry.order_id = Some(*order_id);
            }
        }
        Event::WaitlistExpired { entry_id, .. } => {
            if let Some(entry) = rs.waitlist_entry_mut(entry_id) {
                entry.status = WaitlistStatus::Expired;
            }
        }
        Event::WaitlistRemoved { entry_id, .. } => {
            if let Some(entry) = rs.waitlist_entry_mut(entry_id) {
                entry.status = WaitlistStatus::Removed;
            }
        }
        // RoomRegistered/RoomRetired are handled at the DashMap level, not here
        Event::RoomRegistered { .. } | Event::RoomRetired { .. } => {}
    }
}

impl Engine {
    /// Open with the default collaborators (unranked search, log audit sink).
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        Self::with_collaborators(wal_path, notify, Arc::new(UnrankedSearch), Arc::new(LogSink), config)
    }

    pub fn with_collaborators(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        search: Arc<dyn AlternativeSearch>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            search,
            audit,
            config,
            order_to_room: DashMap::new(),
            entry_to_room: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomRegistered {
                    id,
                    room_type,
                    max_guests,
                    status,
                    version,
                } => {
                    let mut rs = RoomState::new(*id, room_type.clone(), *max_guests);
                    rs.status = *status;
                    rs.version = *version;
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RoomRetired { id } => {
                    engine.state.remove(id);
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.state.get(&room_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(
                            &mut guard,
                            other,
                            &engine.order_to_room,
                            &engine.entry_to_room,
                        );
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(engine.state.len() as f64);

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_order(&self, order_id: OrderId) -> Option<Ulid> {
        self.order_to_room.get(&order_id).map(|e| *e.value())
    }

    pub fn room_for_entry(&self, entry_id: &Ulid) -> Option<Ulid> {
        self.entry_to_room.get(entry_id).map(|e| *e.value())
    }

    /// WAL-append + apply + audit + notify in one call.
    /// `requester` routes the event onto that requester's topic as well.
    pub(super) async fn persist_and_apply(
        &self,
        room_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
        requester: Option<Ulid>,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.order_to_room, &self.entry_to_room);
        self.audit.append(audit_record(event));
        self.notify.publish(room_id, requester, event);
        Ok(())
    }

    // ── Room registry ────────────────────────────────────

    pub async fn register_room(
        &self,
        id: Ulid,
        room_type: &str,
        max_guests: u32,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if room_type.len() > MAX_ROOM_TYPE_LEN {
            return Err(EngineError::LimitExceeded("room type too long"));
        }
        if max_guests == 0 {
            return Err(EngineError::LimitExceeded("max_guests must be positive"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomRegistered {
            id,
            room_type: room_type.to_string(),
            max_guests,
            status: RoomStatus::Available,
            version: 0,
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, room_type.to_string(), max_guests);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.audit.append(audit_record(&event));
        self.notify.publish(id, None, &event);
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.state.len() as f64);
        Ok(())
    }

    /// Retire a room. Refused while reservations or live waitlist entries remain.
    pub async fn retire_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        let live_waitlist = guard.waitlist.iter().any(|e| !e.status.is_terminal());
        if !guard.reservations.is_empty() || live_waitlist {
            return Err(EngineError::RoomBusy(id));
        }
        drop(guard);

        let event = Event::RoomRetired { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.audit.append(audit_record(&event));
        self.notify.publish(id, None, &event);
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.state.len() as f64);
        Ok(())
    }

    // ── WAL compaction ───────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Terminal waitlist entries are dropped;
    /// the audit sink holds the full history.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let rooms: Vec<SharedRoomState> = self.state.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let guard = rs.read().await;

            events.push(Event::RoomRegistered {
                id: guard.id,
                room_type: guard.room_type.clone(),
                max_guests: guard.max_guests,
                status: guard.status,
                version: guard.version,
            });

            for r in &guard.reservations {
                events.push(Event::ReservationPlaced {
                    room_id: guard.id,
                    order_id: r.order_id,
                    requester: r.requester,
                    span: r.span,
                    at: r.created_at,
                });
            }

            for e in &guard.waitlist {
                if e.status.is_terminal() {
                    continue;
                }
                events.push(Event::WaitlistEnrolled {
                    entry_id: e.id,
                    room_id: guard.id,
                    requester: e.requester,
                    span: e.span,
                    guests: e.guests,
                    priority: e.priority,
                    seq: e.seq,
                    note: e.note.clone(),
                    at: e.created_at,
                });
                if e.status == WaitlistStatus::Notified
                    && let (Some(notified_at), Some(expires_at)) = (e.notified_at, e.expires_at)
                {
                    events.push(Event::WaitlistNotified {
                        entry_id: e.id,
                        room_id: guard.id,
                        notified_at,
                        expires_at,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the room_id from an event (for non-Register/Retire events).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomStatusChanged { room_id, .. }
        | Event::ReservationPlaced { room_id, .. }
        | Event::ReservationCancelled { room_id, .. }
        | Event::WaitlistEnrolled { room_id, .. }
        | Event::WaitlistNotified { room_id, .. }
        | Event::WaitlistConfirmed { room_id, .. }
        | Event::WaitlistExpired { room_id, .. }
        | Event::WaitlistRemoved { room_id, .. } => Some(*room_id),
        Event::RoomRegistered { .. } | Event::RoomRetired { .. } => None,
    }
}
