use std::io;
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A bookable unit, as known to the product catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub label: String,
}

/// Lookup of bookable resources. The engine never creates resources itself.
pub trait ResourceCatalog: Send + Sync {
    fn get_by_id(&self, id: &Ulid) -> Option<Resource>;

    fn list(&self) -> Vec<Resource>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    resources: DashMap<Ulid, Resource>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Ulid, label: impl Into<String>) -> Resource {
        let resource = Resource { id, label: label.into() };
        self.resources.insert(id, resource.clone());
        resource
    }

    pub fn remove(&self, id: &Ulid) -> Option<Resource> {
        self.resources.remove(id).map(|(_, r)| r)
    }

    /// Load a JSON array of resources. A missing file is an empty catalog.
    pub fn load(path: &Path) -> io::Result<Self> {
        let catalog = Self::new();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(catalog),
            Err(e) => return Err(e),
        };
        let resources: Vec<Resource> = serde_json::from_slice(&bytes)?;
        for r in resources {
            catalog.resources.insert(r.id, r);
        }
        Ok(catalog)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.list())?;
        std::fs::write(path, json)
    }
}

impl ResourceCatalog for InMemoryCatalog {
    fn get_by_id(&self, id: &Ulid) -> Option<Resource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    fn list(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let catalog = InMemoryCatalog::new();
        let id = Ulid::new();
        catalog.register(id, "Cabin");
        assert_eq!(catalog.get_by_id(&id).unwrap().label, "Cabin");
        assert!(catalog.get_by_id(&Ulid::new()).is_none());
        assert!(catalog.remove(&id).is_some());
        assert!(catalog.list().is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = std::env::temp_dir().join("daybook_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("resources.json");
        let _ = std::fs::remove_file(&path);

        assert!(InMemoryCatalog::load(&path).unwrap().list().is_empty());

        let catalog = InMemoryCatalog::new();
        catalog.register(Ulid::new(), "Cabin");
        catalog.register(Ulid::new(), "Boat");
        catalog.save(&path).unwrap();

        let loaded = InMemoryCatalog::load(&path).unwrap();
        assert_eq!(loaded.list(), catalog.list());
        let _ = std::fs::remove_file(&path);
    }
}
