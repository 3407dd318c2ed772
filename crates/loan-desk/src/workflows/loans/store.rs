use std::collections::BTreeMap;
use std::sync::Mutex;

use super::domain::{
    Allocation, Building, BuildingId, BuildingResponse, Equipment, EquipmentId, LoanRequest,
    RequestId, RequestItem, RequestItemId, ResponseId, ResponseItem, ResponseToken,
    StatusHistoryEntry, TokenId,
};

/// Logical tables of the loan workflow. Vectors keep insertion order for presentation.
#[derive(Debug, Clone, Default)]
pub struct LedgerTables {
    pub requests: BTreeMap<RequestId, LoanRequest>,
    pub items: Vec<RequestItem>,
    pub history: Vec<StatusHistoryEntry>,
    pub tokens: Vec<ResponseToken>,
    pub responses: Vec<BuildingResponse>,
    pub response_items: Vec<ResponseItem>,
    pub allocations: Vec<Allocation>,
    pub buildings: Vec<Building>,
    pub equipment: Vec<Equipment>,
}

impl LedgerTables {
    pub fn request(&self, id: &RequestId) -> Option<&LoanRequest> {
        self.requests.get(id)
    }

    pub fn request_mut(&mut self, id: &RequestId) -> Option<&mut LoanRequest> {
        self.requests.get_mut(id)
    }

    pub fn items_for<'a>(
        &'a self,
        request_id: &'a RequestId,
    ) -> impl Iterator<Item = &'a RequestItem> + 'a {
        self.items
            .iter()
            .filter(move |item| &item.request_id == request_id)
    }

    pub fn item_mut(&mut self, id: &RequestItemId) -> Option<&mut RequestItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    pub fn history_for<'a>(
        &'a self,
        request_id: &'a RequestId,
    ) -> impl Iterator<Item = &'a StatusHistoryEntry> + 'a {
        self.history
            .iter()
            .filter(move |entry| &entry.request_id == request_id)
    }

    pub fn token_by_value(&self, token: &str) -> Option<&ResponseToken> {
        self.tokens.iter().find(|record| record.token == token)
    }

    pub fn token_mut(&mut self, id: &TokenId) -> Option<&mut ResponseToken> {
        self.tokens.iter_mut().find(|record| &record.id == id)
    }

    pub fn tokens_for<'a>(
        &'a self,
        request_id: &'a RequestId,
    ) -> impl Iterator<Item = &'a ResponseToken> + 'a {
        self.tokens
            .iter()
            .filter(move |record| &record.request_id == request_id)
    }

    pub fn responses_for<'a>(
        &'a self,
        request_id: &'a RequestId,
    ) -> impl Iterator<Item = &'a BuildingResponse> + 'a {
        self.responses
            .iter()
            .filter(move |response| &response.request_id == request_id)
    }

    pub fn response_for_building(
        &self,
        token_id: &TokenId,
        building_id: &BuildingId,
    ) -> Option<&BuildingResponse> {
        self.responses
            .iter()
            .find(|response| &response.token_id == token_id && &response.building_id == building_id)
    }

    pub fn response_mut(&mut self, id: &ResponseId) -> Option<&mut BuildingResponse> {
        self.responses.iter_mut().find(|response| &response.id == id)
    }

    pub fn response_items_of<'a>(
        &'a self,
        response_id: &'a ResponseId,
    ) -> impl Iterator<Item = &'a ResponseItem> + 'a {
        self.response_items
            .iter()
            .filter(move |item| &item.response_id == response_id)
    }

    pub fn allocations_of<'a>(
        &'a self,
        item_id: &'a RequestItemId,
    ) -> impl Iterator<Item = &'a Allocation> + 'a {
        self.allocations
            .iter()
            .filter(move |allocation| &allocation.request_item_id == item_id)
    }

    pub fn building(&self, id: &BuildingId) -> Option<&Building> {
        self.buildings.iter().find(|building| &building.id == id)
    }

    pub fn enabled_buildings(&self) -> impl Iterator<Item = &Building> {
        self.buildings.iter().filter(|building| building.enabled)
    }

    pub fn equipment(&self, id: &EquipmentId) -> Option<&Equipment> {
        self.equipment.iter().find(|equipment| &equipment.id == id)
    }

    pub fn equipment_name(&self, id: &EquipmentId) -> String {
        self.equipment(id)
            .map(|equipment| equipment.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn building_name(&self, id: &BuildingId) -> String {
        self.building(id)
            .map(|building| building.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Storage abstraction. A transaction either commits every write made by `work` or none.
pub trait LoanStore: Send + Sync {
    fn read<T>(&self, query: impl FnOnce(&LedgerTables) -> T) -> Result<T, RepositoryError>;

    fn transaction<T, E>(
        &self,
        work: impl FnOnce(&mut LedgerTables) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Process-local store. Units of work run one at a time against a copy of the tables that is
/// swapped in only when the work succeeds.
#[derive(Debug, Default)]
pub struct MemoryLoanStore {
    tables: Mutex<LedgerTables>,
}

impl MemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a building in the roster; names are unique.
    pub fn add_building(&self, building: Building) -> Result<(), RepositoryError> {
        self.transaction(|tables: &mut LedgerTables| {
            if tables
                .buildings
                .iter()
                .any(|existing| existing.id == building.id || existing.name == building.name)
            {
                return Err(RepositoryError::Conflict);
            }
            tables.buildings.push(building);
            Ok(())
        })
    }

    /// Register a catalog entry; names are unique.
    pub fn add_equipment(&self, equipment: Equipment) -> Result<(), RepositoryError> {
        self.transaction(|tables: &mut LedgerTables| {
            if tables
                .equipment
                .iter()
                .any(|existing| existing.id == equipment.id || existing.name == equipment.name)
            {
                return Err(RepositoryError::Conflict);
            }
            tables.equipment.push(equipment);
            Ok(())
        })
    }
}

impl LoanStore for MemoryLoanStore {
    fn read<T>(&self, query: impl FnOnce(&LedgerTables) -> T) -> Result<T, RepositoryError> {
        let guard = self
            .tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("ledger mutex poisoned".to_string()))?;
        Ok(query(&guard))
    }

    fn transaction<T, E>(
        &self,
        work: impl FnOnce(&mut LedgerTables) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("ledger mutex poisoned".to_string()))?;
        let mut draft = guard.clone();
        let value = work(&mut draft)?;
        *guard = draft;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building(id: &str, name: &str) -> Building {
        Building {
            id: BuildingId::from(id),
            name: name.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn failed_transaction_leaves_tables_untouched() {
        let store = MemoryLoanStore::new();
        store
            .add_building(building("b-1", "Library"))
            .expect("building added");

        let result: Result<(), RepositoryError> = store.transaction(|tables| {
            tables.buildings.push(building("b-2", "Gym"));
            Err(RepositoryError::Conflict)
        });

        assert!(matches!(result, Err(RepositoryError::Conflict)));
        let count = store.read(|tables| tables.buildings.len()).expect("read");
        assert_eq!(count, 1);
    }

    #[test]
    fn duplicate_building_names_conflict() {
        let store = MemoryLoanStore::new();
        store
            .add_building(building("b-1", "Library"))
            .expect("building added");
        assert!(matches!(
            store.add_building(building("b-2", "Library")),
            Err(RepositoryError::Conflict)
        ));
    }
}
