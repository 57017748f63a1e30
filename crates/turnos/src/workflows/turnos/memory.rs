use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};

use super::domain::{
    CatalogItemRef, IdentityHash, LineItemId, RequesterId, Turno, TurnoId, TurnoStatus,
};
use super::repository::{
    InventoryStore, RepositoryError, TurnoQueries, TurnoRepository, TurnoTransaction,
};
use crate::workflows::inventory::StockEntry;

/// In-process store. A transaction works on a copy of the state and swaps it in on success,
/// while holding the lock, so concurrent transactions are fully serialized.
#[derive(Debug, Default)]
pub struct MemoryTurnoStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    turnos: BTreeMap<TurnoId, Turno>,
    stock: HashMap<CatalogItemRef, i64>,
    last_turno_id: u64,
    last_line_item_id: u64,
}

impl MemoryTurnoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (CatalogItemRef, i64)>,
    {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.stock.extend(entries);
        }
        store
    }

    /// Registers catalog items, replacing stock for items already known.
    pub fn load_inventory(&self, entries: &[StockEntry]) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        for entry in entries {
            state.stock.insert(entry.item, entry.stock);
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("turno store mutex poisoned".to_string()))
    }
}

impl TurnoRepository for MemoryTurnoStore {
    fn read<T, E, F>(&self, query: F) -> Result<T, E>
    where
        F: FnOnce(&dyn TurnoQueries) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let state = self.lock()?;
        query(&*state)
    }

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn TurnoTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut state = self.lock()?;
        let mut working = state.clone();
        let value = work(&mut working)?;
        *state = working;
        Ok(value)
    }
}

impl StoreState {
    fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Turno> {
        self.turnos.values().filter(move |turno| {
            turno.status.is_active() && turno.service_date() == Some(date)
        })
    }
}

impl TurnoQueries for StoreState {
    fn turno(&self, id: TurnoId) -> Result<Option<Turno>, RepositoryError> {
        Ok(self.turnos.get(&id).cloned())
    }

    fn count_requester_active_between(
        &self,
        requester: &RequesterId,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Result<u32, RepositoryError> {
        let count = self
            .turnos
            .values()
            .filter(|turno| {
                turno.is_owned_by(requester)
                    && turno.status.is_active()
                    && turno.requested_at >= from
                    && turno.requested_at < until
            })
            .count();
        Ok(count as u32)
    }

    fn count_active_on(&self, date: NaiveDate) -> Result<u32, RepositoryError> {
        Ok(self.active_on(date).count() as u32)
    }

    fn active_slots_on(&self, date: NaiveDate) -> Result<Vec<NaiveDateTime>, RepositoryError> {
        Ok(self
            .active_on(date)
            .filter_map(|turno| turno.assigned_at)
            .collect())
    }

    fn max_daily_number(&self, date: NaiveDate) -> Result<Option<u32>, RepositoryError> {
        Ok(self
            .turnos
            .values()
            .filter(|turno| turno.service_date() == Some(date))
            .filter_map(|turno| turno.daily_number)
            .max())
    }

    fn approved_due_by(&self, date: NaiveDate) -> Result<Vec<TurnoId>, RepositoryError> {
        Ok(self
            .turnos
            .values()
            .filter(|turno| turno.status == TurnoStatus::Approved)
            .filter(|turno| turno.service_date().is_some_and(|day| day <= date))
            .map(|turno| turno.id)
            .collect())
    }

    fn with_status(&self, status: TurnoStatus) -> Result<Vec<Turno>, RepositoryError> {
        Ok(self
            .turnos
            .values()
            .filter(|turno| turno.status == status)
            .cloned()
            .collect())
    }

    fn on_date(&self, date: NaiveDate) -> Result<Vec<Turno>, RepositoryError> {
        let mut turnos: Vec<Turno> = self
            .turnos
            .values()
            .filter(|turno| turno.service_date() == Some(date))
            .cloned()
            .collect();
        turnos.sort_by_key(|turno| (turno.daily_number.unwrap_or(u32::MAX), turno.id));
        Ok(turnos)
    }

    fn with_identity(&self, identity: &IdentityHash) -> Result<Vec<Turno>, RepositoryError> {
        Ok(self
            .turnos
            .values()
            .filter(|turno| &turno.identity_hash == identity)
            .cloned()
            .collect())
    }
}

impl InventoryStore for StoreState {
    fn stock(&self, item: &CatalogItemRef) -> Result<Option<i64>, RepositoryError> {
        Ok(self.stock.get(item).copied())
    }

    fn adjust_stock(&mut self, item: &CatalogItemRef, delta: i64) -> Result<(), RepositoryError> {
        let current = self.stock.get_mut(item).ok_or(RepositoryError::NotFound)?;
        *current += delta;
        Ok(())
    }
}

impl TurnoTransaction for StoreState {
    fn next_turno_id(&mut self) -> TurnoId {
        self.last_turno_id += 1;
        TurnoId(self.last_turno_id)
    }

    fn next_line_item_id(&mut self) -> LineItemId {
        self.last_line_item_id += 1;
        LineItemId(self.last_line_item_id)
    }

    fn insert_turno(&mut self, turno: Turno) -> Result<(), RepositoryError> {
        if self.turnos.contains_key(&turno.id) {
            return Err(RepositoryError::Conflict);
        }
        self.turnos.insert(turno.id, turno);
        Ok(())
    }

    fn update_turno(&mut self, turno: &Turno) -> Result<(), RepositoryError> {
        match self.turnos.get_mut(&turno.id) {
            Some(stored) => {
                *stored = turno.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }
}
