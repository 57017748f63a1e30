use chrono::{NaiveDate, NaiveDateTime};

use super::domain::{
    CatalogItemRef, IdentityHash, LineItemId, RequesterId, Turno, TurnoId, TurnoStatus,
};

/// Read access to stored turnos, shared by transactions and plain queries.
pub trait TurnoQueries {
    fn turno(&self, id: TurnoId) -> Result<Option<Turno>, RepositoryError>;

    /// Active turnos of a requester whose `requested_at` falls in `[from, until)`.
    fn count_requester_active_between(
        &self,
        requester: &RequesterId,
        from: NaiveDateTime,
        until: NaiveDateTime,
    ) -> Result<u32, RepositoryError>;

    /// Active turnos assigned to the given service day.
    fn count_active_on(&self, date: NaiveDate) -> Result<u32, RepositoryError>;

    /// Slot times held by the active turnos of a service day.
    fn active_slots_on(&self, date: NaiveDate) -> Result<Vec<NaiveDateTime>, RepositoryError>;

    /// Highest daily number held by any turno of the day, including expired ones.
    fn max_daily_number(&self, date: NaiveDate) -> Result<Option<u32>, RepositoryError>;

    /// Approved turnos whose service day is on or before `date`.
    fn approved_due_by(&self, date: NaiveDate) -> Result<Vec<TurnoId>, RepositoryError>;

    fn with_status(&self, status: TurnoStatus) -> Result<Vec<Turno>, RepositoryError>;

    /// Turnos assigned to a service day, ordered by daily number (unnumbered last).
    fn on_date(&self, date: NaiveDate) -> Result<Vec<Turno>, RepositoryError>;

    fn with_identity(&self, identity: &IdentityHash) -> Result<Vec<Turno>, RepositoryError>;
}

/// Per-item stock counters kept by the inventory subsystem.
pub trait InventoryStore {
    /// Current stock, or `None` when the catalog does not know the item.
    fn stock(&self, item: &CatalogItemRef) -> Result<Option<i64>, RepositoryError>;

    fn adjust_stock(&mut self, item: &CatalogItemRef, delta: i64) -> Result<(), RepositoryError>;
}

/// Unit of work handed to workflow closures. Every change made through it commits together.
pub trait TurnoTransaction: TurnoQueries + InventoryStore {
    fn next_turno_id(&mut self) -> TurnoId;
    fn next_line_item_id(&mut self) -> LineItemId;
    fn insert_turno(&mut self, turno: Turno) -> Result<(), RepositoryError>;
    fn update_turno(&mut self, turno: &Turno) -> Result<(), RepositoryError>;
}

/// Storage abstraction for turnos and the stock counters they reserve.
///
/// `transaction` runs `work` with serializable isolation: the closure either commits
/// every write or, when it returns `Err`, none of them.
pub trait TurnoRepository: Send + Sync {
    fn read<T, E, F>(&self, query: F) -> Result<T, E>
    where
        F: FnOnce(&dyn TurnoQueries) -> Result<T, E>,
        E: From<RepositoryError>;

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn TurnoTransaction) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
