mod availability;
mod blocks;
mod conflict;
mod error;
mod mutations;
mod occupancy;
mod queries;
mod schedule;

pub use availability::{generate_slots, merge_overlapping};
pub use blocks::blocks_for_day;
pub use error::EngineError;
pub use mutations::BookingRequest;
pub use occupancy::occupancy;
pub use schedule::{resolve_day_window, seed_week, DayWindow};

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;

pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

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
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
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

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
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

pub struct Engine {
    pub state: DashMap<Ulid, SharedBusinessState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub config: EngineConfig,
    /// Reverse lookup: entity (staff/service/block/appointment) id → business id
    pub(super) entity_to_business: DashMap<Ulid, Ulid>,
    /// Held shared by every mutation from before it locks its business until
    /// its event is applied; held exclusively by compaction. Lock order is
    /// always gate, then business.
    pub(super) wal_gate: Arc<RwLock<()>>,
}

/// Write access to one business, plus the shared WAL gate.
pub(super) struct BusinessWriteGuard {
    business: OwnedRwLockWriteGuard<BusinessState>,
    _gate: OwnedRwLockReadGuard<()>,
}

impl Deref for BusinessWriteGuard {
    type Target = BusinessState;

    fn deref(&self) -> &BusinessState {
        &self.business
    }
}

impl DerefMut for BusinessWriteGuard {
    fn deref_mut(&mut self) -> &mut BusinessState {
        &mut self.business
    }
}

/// Apply an event directly to a BusinessState (no locking, caller holds the lock).
fn apply_to_business(bs: &mut BusinessState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ScheduleEntrySet { entry, .. } => {
            bs.set_schedule_entry(entry.clone());
        }
        Event::StaffAdded {
            id,
            business_id,
            name,
        } => {
            bs.staff.push(StaffMember {
                id: *id,
                business_id: *business_id,
                name: name.clone(),
            });
            entity_map.insert(*id, *business_id);
        }
        Event::StaffRemoved { id, .. } => {
            bs.remove_staff(id);
            entity_map.remove(id);
        }
        Event::ServiceCreated {
            id,
            business_id,
            name,
            duration_minutes,
            price_cents,
        }
        | Event::ServiceUpdated {
            id,
            business_id,
            name,
            duration_minutes,
            price_cents,
        } => {
            bs.upsert_service(Service {
                id: *id,
                business_id: *business_id,
                name: name.clone(),
                duration_minutes: *duration_minutes,
                price_cents: *price_cents,
            });
            entity_map.insert(*id, *business_id);
        }
        Event::ServiceRemoved { id, .. } => {
            bs.remove_service(id);
            entity_map.remove(id);
        }
        Event::BlockAdded {
            id,
            business_id,
            span,
            reason,
        } => {
            bs.insert_block(EmergencyBlock {
                id: *id,
                business_id: *business_id,
                span: *span,
                reason: reason.clone(),
            });
            entity_map.insert(*id, *business_id);
        }
        Event::BlockRemoved { id, .. } => {
            bs.remove_block(id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked {
            id,
            business_id,
            service_id,
            staff_id,
            booker,
            span,
            status,
            created_at,
        } => {
            bs.insert_appointment(Appointment {
                id: *id,
                business_id: *business_id,
                service_id: *service_id,
                staff_id: *staff_id,
                booker: booker.clone(),
                span: *span,
                status: *status,
                created_at: *created_at,
            });
            entity_map.insert(*id, *business_id);
        }
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(a) = bs.appointment_mut(id) {
                a.status = *status;
            }
        }
        Event::AppointmentsPurged { ids, .. } => {
            for id in ids {
                bs.remove_appointment(id);
                entity_map.remove(id);
            }
        }
        // BusinessCreated/Deleted are handled at the DashMap level, not here
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => {}
    }
}

/// Drop every reverse-index entry pointing into a business.
fn unmap_business(bs: &BusinessState, entity_map: &DashMap<Ulid, Ulid>) {
    let ids = bs
        .staff
        .iter()
        .map(|s| s.id)
        .chain(bs.services.iter().map(|s| s.id))
        .chain(bs.blocks.iter().map(|b| b.id))
        .chain(bs.appointments.iter().map(|a| a.id));
    for id in ids {
        entity_map.remove(&id);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            config,
            entity_to_business: DashMap::new(),
            wal_gate: Arc::new(RwLock::new(())),
        };

        // Replay events. We're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this runs inside an async context.
        for event in &events {
            match event {
                Event::BusinessCreated { id, name, schedule } => {
                    let mut bs = BusinessState::new(*id, name.clone());
                    for entry in schedule {
                        bs.set_schedule_entry(entry.clone());
                    }
                    engine.state.insert(*id, Arc::new(RwLock::new(bs)));
                }
                Event::BusinessDeleted { id } => {
                    if let Some((_, shared)) = engine.state.remove(id) {
                        let guard = shared.try_read().expect("replay: uncontended read");
                        unmap_business(&guard, &engine.entity_to_business);
                    }
                }
                other => {
                    if let Some(business_id) = event_business_id(other)
                        && let Some(entry) = engine.state.get(&business_id) {
                            let shared = entry.clone();
                            let mut guard = shared.try_write().expect("replay: uncontended write");
                            apply_to_business(&mut guard, other, &engine.entity_to_business);
                        }
                }
            }
        }

        metrics::gauge!(crate::observability::BUSINESSES_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            events = events.len(),
            businesses = engine.state.len(),
            "engine state replayed from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Start an engine from configuration: install the metrics exporter on
    /// `metrics_port`, replay the WAL under `data_dir` and spawn the
    /// background compactor.
    pub fn open(config: EngineConfig) -> io::Result<Arc<Self>> {
        crate::observability::init(config.metrics_port).map_err(io::Error::other)?;
        let engine = Arc::new(Self::new(config.wal_path(), config)?);
        crate::compactor::spawn_compactor(engine.clone());
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer. The caller
    /// holds the WAL gate.
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

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_business_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_business.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. The caller holds the write lock, so
    /// the check that preceded this call still holds when the event lands.
    pub(super) async fn persist_and_apply(
        &self,
        bs: &mut BusinessState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_business(bs, event, &self.entity_to_business);
        Ok(())
    }

    /// Claim a fresh entity id for `business_id`. Ids are unique across
    /// businesses and entity kinds, and never collide with a business id.
    pub(super) fn reserve_entity(&self, id: Ulid, business_id: Ulid) -> Result<(), EngineError> {
        match self.entity_to_business.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(business_id);
            }
        }
        if self.state.contains_key(&id) {
            self.entity_to_business.remove(&id);
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(())
    }

    /// `persist_and_apply` for an event introducing entity `id`. The
    /// reservation is dropped again if the write fails.
    pub(super) async fn persist_new_entity(
        &self,
        bs: &mut BusinessState,
        id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.reserve_entity(id, bs.id)?;
        let result = self.persist_and_apply(bs, event).await;
        if result.is_err() {
            self.entity_to_business.remove(&id);
        }
        result
    }

    /// Take the WAL gate, then the business write lock. A business deleted
    /// while we waited is reported as not found.
    pub(super) async fn business_write(
        &self,
        business_id: &Ulid,
    ) -> Result<BusinessWriteGuard, EngineError> {
        let gate = self.wal_gate.clone().read_owned().await;
        let shared = self
            .get_business(business_id)
            .ok_or(EngineError::NotFound(*business_id))?;
        let business = shared.clone().write_owned().await;
        let current = self
            .state
            .get(business_id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &shared));
        if !current {
            return Err(EngineError::NotFound(*business_id));
        }
        Ok(BusinessWriteGuard {
            business,
            _gate: gate,
        })
    }

    /// Lookup entity → business, get business, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<BusinessWriteGuard, EngineError> {
        let business_id = self
            .get_business_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        self.business_write(&business_id).await
    }
}

/// Extract the business id from an event (for non-Create/Delete events).
fn event_business_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ScheduleEntrySet { business_id, .. }
        | Event::StaffAdded { business_id, .. }
        | Event::StaffRemoved { business_id, .. }
        | Event::ServiceCreated { business_id, .. }
        | Event::ServiceUpdated { business_id, .. }
        | Event::ServiceRemoved { business_id, .. }
        | Event::BlockAdded { business_id, .. }
        | Event::BlockRemoved { business_id, .. }
        | Event::AppointmentBooked { business_id, .. }
        | Event::AppointmentStatusChanged { business_id, .. }
        | Event::AppointmentsPurged { business_id, .. } => Some(*business_id),
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => None,
    }
}
